use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::subscriber as tracing_subscriber_global;
use tracing_appender::rolling::RollingFileAppender;
use tracing_log::LogTracer;
use tracing_subscriber;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use wallet_login_broker as lib;

use lib::auth::flow::{LoginBroker, LoginError};
use lib::auth::session::SessionManager;
use lib::config::Config;

#[derive(Parser)]
#[command(name = "wallet-login-broker", version)]
struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in to the wallet (opens the authorization page, then waits
    /// for the pasted redirect URL)
    Login {
        /// Print the authorization URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },
    /// Show whether a wallet session is stored and when it expires
    Status,
    /// Refresh the stored wallet session now
    Refresh,
    /// Drop the stored wallet session
    Logout,
    /// Validate config file and exit
    ConfigValidate,
    /// Campaign schedule helpers
    Schedule {
        #[command(subcommand)]
        sub: ScheduleCommands,
    },
}

#[derive(Subcommand)]
enum ScheduleCommands {
    /// Convert a UTC run window into a timezone, e.g. `window 9 17 --timezone Asia/Baku`
    Window {
        /// Window start, UTC hour 0-23
        #[arg(value_parser = clap::value_parser!(u32).range(0..=23))]
        start: u32,
        /// Window end, UTC hour 0-23
        #[arg(value_parser = clap::value_parser!(u32).range(0..=23))]
        end: u32,
        #[arg(long)]
        timezone: Option<String>,
    },
    /// Current time in a timezone
    Now {
        #[arg(long)]
        timezone: Option<String>,
    },
    /// Format a date the way campaign listings do
    Format {
        /// Date string, e.g. 2024-01-15T10:00:00Z
        date: String,
        #[arg(long)]
        timezone: Option<String>,
        /// Month abbreviation locale (az, en, ru); defaults to the configured one
        #[arg(long)]
        locale: Option<String>,
        /// Append the time of day
        #[arg(long)]
        time: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // Resolve config path: explicit --config overrides; otherwise prefer
    // system-wide /etc/wallet-login/config.toml and fall back to the
    // repository example config for local/dev usage.
    let resolved_config_path: PathBuf = match &cli.config {
        Some(p) => p.clone(),
        None => {
            let etc_path = Path::new("/etc/wallet-login/config.toml");
            if etc_path.exists() {
                etc_path.to_path_buf()
            } else {
                PathBuf::from("config/example-config.toml")
            }
        }
    };

    let cfg = Config::from_path(&resolved_config_path)
        .with_context(|| format!("loading config from {}", resolved_config_path.display()))?;

    // Initialize log->tracing bridge and structured logging.
    // Logs go to both stdout and a daily-rotated file in cfg.log_dir.
    let _ = LogTracer::init();
    let file_appender: RollingFileAppender =
        tracing_appender::rolling::daily(&cfg.log_dir, "wallet-login.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Honor RUST_LOG if set, otherwise default to info.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer().with_writer(non_blocking);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer);

    // Install as global default tracing subscriber without triggering
    // tracing-subscriber's internal log bridge (we already call LogTracer).
    tracing_subscriber_global::set_global_default(subscriber)
        .expect("failed to set global tracing subscriber");

    match cli.command {
        Commands::Login { no_browser } => {
            let broker = Arc::new(LoginBroker::new(cfg.clone()));
            let started = match broker.start_login(!no_browser).await {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Sign-in failed ({}): {}", e.kind(), e);
                    std::process::exit(1);
                }
            };

            println!(
                "Open this URL in your browser if it did not open automatically:\n\n{}\n",
                started.authorize_url
            );
            println!(
                "After approving, you'll be redirected to {}. Copy the full redirect URL and paste it here.",
                cfg.redirect_uri()
            );
            println!("Paste redirect URL (Ctrl-C cancels):");

            let mut waiter = {
                let broker = broker.clone();
                tokio::spawn(async move { broker.wait_for_callback(started).await })
            };
            let pasted = tokio::task::spawn_blocking(|| {
                let mut line = String::new();
                std::io::stdin().read_line(&mut line).map(|_| line)
            });

            tokio::select! {
                res = &mut waiter => match res {
                    Ok(outcome) => report_login_outcome(outcome),
                    Err(e) => {
                        eprintln!("Login task failed: {}", e);
                        std::process::exit(1);
                    }
                },
                line = pasted => {
                    let line = match line {
                        Ok(Ok(l)) => l,
                        Ok(Err(e)) => {
                            eprintln!("Failed to read input: {}", e);
                            broker.cancel_pending();
                            waiter.abort();
                            std::process::exit(1);
                        }
                        Err(e) => {
                            eprintln!("Input task failed: {}", e);
                            broker.cancel_pending();
                            waiter.abort();
                            std::process::exit(1);
                        }
                    };
                    if let Err(e) = broker.complete_authorization(line.trim()).await {
                        eprintln!("Completing authorization failed: {:#}", e);
                        broker.cancel_pending();
                        waiter.abort();
                        std::process::exit(1);
                    }
                    match waiter.await {
                        Ok(outcome) => report_login_outcome(outcome),
                        Err(e) => {
                            eprintln!("Login task failed: {}", e);
                            std::process::exit(1);
                        }
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    broker.cancel_pending();
                    waiter.abort();
                    eprintln!("Sign-in cancelled.");
                    std::process::exit(1);
                }
            }
        }
        Commands::Status => {
            let sessions = SessionManager::new(cfg.clone());
            match sessions.current().await {
                Ok(Some(session)) => {
                    let expiry = chrono::DateTime::<chrono::Utc>::from_timestamp(session.expires_at, 0)
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                        .unwrap_or_else(|| session.expires_at.to_string());
                    if session.is_expired() {
                        println!("Signed in, but the session expired at {}.", expiry);
                        println!("Run `refresh` or `login` to get a fresh one.");
                    } else {
                        println!("Signed in. Session valid until {}.", expiry);
                    }
                    if let Some(scope) = &session.scope {
                        println!("Scope: {}", scope);
                    }
                }
                Ok(None) => println!("Not signed in."),
                Err(e) => {
                    eprintln!("Failed to read session: {:#}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Refresh => {
            let sessions = SessionManager::new(cfg.clone());
            match sessions.refresh().await {
                Ok(()) => println!("Session refreshed."),
                Err(e) => {
                    eprintln!("Refresh failed: {:#}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Logout => {
            let broker = LoginBroker::new(cfg.clone());
            match broker.logout().await {
                Ok(()) => println!("Signed out."),
                Err(e) => {
                    eprintln!("Logout failed: {:#}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::ConfigValidate => {
            match Config::from_path(resolved_config_path.as_path()) {
                Ok(_) => println!("OK"),
                Err(e) => {
                    eprintln!("Config validation failed: {}", e);
                    std::process::exit(2);
                }
            }
        }
        Commands::Schedule { sub } => match sub {
            ScheduleCommands::Window { start, end, timezone } => {
                match lib::schedule::convert_run_hours_to_timezone(
                    Some(start),
                    Some(end),
                    timezone.as_deref(),
                ) {
                    Some(window) => println!("{}", window.display),
                    None => println!("-"),
                }
            }
            ScheduleCommands::Now { timezone } => {
                let now = lib::schedule::current_time_in_timezone(timezone.as_deref());
                println!("{}", now.format("%Y-%m-%d %H:%M %Z"));
            }
            ScheduleCommands::Format { date, timezone, locale, time } => {
                let opts = lib::schedule::DateFormatOptions {
                    include_time: time,
                    locale: locale.unwrap_or_else(|| cfg.locale.clone()),
                };
                println!(
                    "{}",
                    lib::schedule::format_date_in_timezone(Some(&date), timezone.as_deref(), &opts)
                );
            }
        },
    }

    Ok(())
}

fn report_login_outcome(outcome: Result<(), LoginError>) {
    match outcome {
        Ok(()) => println!("Signed in. Wallet session stored."),
        Err(e) => {
            eprintln!("Sign-in failed ({}): {}", e.kind(), e);
            std::process::exit(1);
        }
    }
}
