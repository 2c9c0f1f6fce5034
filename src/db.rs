use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS wallet_sessions (
    client_id TEXT PRIMARY KEY,
    session_json TEXT NOT NULL,
    last_refreshed INTEGER
);
";

pub fn open_or_create(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    run_migrations(&conn)?;
    Ok(conn)
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Save raw session JSON for a client id, replacing any previous session
pub fn save_session_raw(conn: &Connection, client_id: &str, json_blob: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO wallet_sessions (client_id, session_json, last_refreshed) VALUES (?1, ?2, strftime('%s','now')) ON CONFLICT(client_id) DO UPDATE SET session_json = excluded.session_json, last_refreshed = strftime('%s','now')",
        params![client_id, json_blob],
    )?;
    Ok(())
}

/// Load raw session JSON for a client id
pub fn load_session_raw(conn: &Connection, client_id: &str) -> Result<Option<String>> {
    let mut stmt =
        conn.prepare("SELECT session_json FROM wallet_sessions WHERE client_id = ?1 LIMIT 1")?;
    let row = stmt
        .query_row(params![client_id], |r| r.get::<_, String>(0))
        .optional()?;
    Ok(row)
}

/// Delete the stored session for a client id.
/// Returns the number of rows removed.
pub fn delete_session(conn: &Connection, client_id: &str) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM wallet_sessions WHERE client_id = ?1",
        params![client_id],
    )?;
    Ok(removed)
}
