use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Offset, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use log::warn;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Organizational default zone, used whenever a campaign has no timezone
/// of its own or names one the tz database does not know.
pub const DEFAULT_TIMEZONE: &str = "Asia/Baku";

const MINUTES_PER_DAY: i64 = 24 * 60;

// Fixed month abbreviations per UI locale. The Azerbaijani forms follow
// the product's house style and differ from CLDR, which is why these are
// data here instead of a runtime i18n lookup.
static MONTHS_AZ: [&str; 12] = [
    "Yan", "Fev", "Mar", "Apr", "May", "İyn", "İyl", "Avq", "Sen", "Okt", "Noy", "Dek",
];
static MONTHS_EN: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];
static MONTHS_RU: [&str; 12] = [
    "Янв", "Фев", "Мар", "Апр", "Май", "Июн", "Июл", "Авг", "Сен", "Окт", "Ноя", "Дек",
];

static MONTH_ABBREVIATIONS: Lazy<HashMap<&'static str, &'static [&'static str; 12]>> =
    Lazy::new(|| {
        HashMap::from([
            ("az", &MONTHS_AZ),
            ("en", &MONTHS_EN),
            ("ru", &MONTHS_RU),
        ])
    });

#[derive(Debug, Clone)]
pub struct DateFormatOptions {
    pub include_time: bool,
    pub locale: String,
}

impl Default for DateFormatOptions {
    fn default() -> Self {
        Self {
            include_time: false,
            locale: "az".into(),
        }
    }
}

/// A campaign run window converted into a display timezone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHoursDisplay {
    pub start_hour: u32,
    pub end_hour: u32,
    pub display: String,
}

fn month_table(locale: &str) -> &'static [&'static str; 12] {
    MONTH_ABBREVIATIONS.get(locale).copied().unwrap_or(&MONTHS_AZ)
}

fn resolve_tz(timezone: Option<&str>) -> Tz {
    let name = timezone.unwrap_or("").trim();
    if name.is_empty() {
        return chrono_tz::Asia::Baku;
    }
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!("unknown timezone '{}', falling back to {}", name, DEFAULT_TIMEZONE);
            chrono_tz::Asia::Baku
        }
    }
}

/// Parse the date strings campaign records carry: RFC 3339, a naive
/// datetime, or a bare date (taken as UTC midnight).
fn parse_instant(input: &str) -> Option<DateTime<Utc>> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
    }
    None
}

/// The zone's UTC offset in minutes as of now. Daily schedules recur, so
/// today's offset is the one that matters for hour conversion.
fn offset_minutes_now(tz: Tz) -> i64 {
    let now = Utc::now().naive_utc();
    tz.offset_from_utc_datetime(&now).fix().local_minus_utc() as i64 / 60
}

/// Format a date for campaign listings: "D Mon YYYY", with ", HH:MM"
/// appended when `include_time` is set. Missing or unparsable input
/// renders as "-" so table cells never error.
pub fn format_date_in_timezone(
    date: Option<&str>,
    timezone: Option<&str>,
    options: &DateFormatOptions,
) -> String {
    let instant = match date.and_then(parse_instant) {
        Some(i) => i,
        None => return "-".into(),
    };
    let local = instant.with_timezone(&resolve_tz(timezone));
    let month = month_table(&options.locale)[local.month0() as usize];
    let base = format!("{} {} {}", local.day(), month, local.year());
    if options.include_time {
        format!("{}, {:02}:{:02}", base, local.hour(), local.minute())
    } else {
        base
    }
}

/// "HH:MM" in the given zone, 24-hour clock. Same "-" contract as the
/// date formatter.
pub fn format_time_in_timezone(date: Option<&str>, timezone: Option<&str>) -> String {
    let instant = match date.and_then(parse_instant) {
        Some(i) => i,
        None => return "-".into(),
    };
    let local = instant.with_timezone(&resolve_tz(timezone));
    format!("{:02}:{:02}", local.hour(), local.minute())
}

/// Convert a local hour-of-day to its UTC hour using the zone's current
/// offset. The result is always normalized into 0..=23. Zones with
/// sub-hour offsets truncate toward the earlier hour.
pub fn convert_hour_to_utc(hour: u32, from_timezone: Option<&str>) -> u32 {
    let off = offset_minutes_now(resolve_tz(from_timezone));
    (hour as i64 * 60 - off).div_euclid(60).rem_euclid(24) as u32
}

/// Inverse of convert_hour_to_utc. Round-trips exactly for zones on
/// whole-hour offsets.
pub fn convert_hour_from_utc(utc_hour: u32, to_timezone: Option<&str>) -> u32 {
    let off = offset_minutes_now(resolve_tz(to_timezone));
    (utc_hour as i64 * 60 + off).div_euclid(60).rem_euclid(24) as u32
}

/// Convert a campaign's UTC run window into the display zone. Returns
/// None when either bound is missing. The bounds convert independently;
/// a window that wraps past midnight keeps its raw converted hours.
pub fn convert_run_hours_to_timezone(
    start_utc_hour: Option<u32>,
    end_utc_hour: Option<u32>,
    timezone: Option<&str>,
) -> Option<RunHoursDisplay> {
    let (start, end) = match (start_utc_hour, end_utc_hour) {
        (Some(s), Some(e)) => (s, e),
        _ => return None,
    };
    let off = offset_minutes_now(resolve_tz(timezone));
    let s_min = (start as i64 * 60 + off).rem_euclid(MINUTES_PER_DAY);
    let e_min = (end as i64 * 60 + off).rem_euclid(MINUTES_PER_DAY);
    Some(RunHoursDisplay {
        start_hour: (s_min / 60) as u32,
        end_hour: (e_min / 60) as u32,
        display: format!(
            "{:02}:{:02} - {:02}:{:02}",
            s_min / 60,
            s_min % 60,
            e_min / 60,
            e_min % 60
        ),
    })
}

/// Zone-aware "now", for display.
pub fn current_time_in_timezone(timezone: Option<&str>) -> DateTime<Tz> {
    Utc::now().with_timezone(&resolve_tz(timezone))
}
