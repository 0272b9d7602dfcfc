//! Database connection management

use crate::errors::{from_rusqlite, Result};
use repose_core::config::DatabaseSettings;
use rusqlite::Connection;
use std::path::Path;

pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    Connection::open(path).map_err(from_rusqlite)
}

/// Open an in-memory SQLite database (for testing)
pub fn open_in_memory() -> Result<Connection> {
    Connection::open_in_memory().map_err(from_rusqlite)
}

/// Open the configured database file and apply its pragmas
pub fn open_configured(settings: &DatabaseSettings) -> Result<Connection> {
    let conn = open(&settings.path)?;
    configure(&conn, settings)?;
    Ok(conn)
}

pub fn configure(conn: &Connection, settings: &DatabaseSettings) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", settings.foreign_keys)
        .map_err(from_rusqlite)?;

    // journal_mode answers with the mode actually in effect; in-memory
    // databases report "memory" whatever was asked for
    let mode: String = conn
        .pragma_update_and_check(None, "journal_mode", settings.journal_mode.as_str(), |row| {
            row.get(0)
        })
        .map_err(from_rusqlite)?;
    tracing::debug!(
        path = %settings.path.display(),
        foreign_keys = settings.foreign_keys,
        journal_mode = mode.as_str(),
        "sqlite configured"
    );

    Ok(())
}
