//! Database connection management
//!
//! Provides utilities for opening and configuring SQLite connections

use crate::errors::{from_rusqlite, io_error, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;

/// How long a connection waits on a locked database before failing
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a SQLite database at the given path, creating parent directories
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| io_error("create_db_dir", e))?;
    }
    let conn = Connection::open(path).map_err(from_rusqlite)?;
    configure(&conn)?;
    Ok(conn)
}

/// Open an existing database without creating or reconfiguring it
///
/// Used by the read-only commands so that inspecting history never creates
/// a database file or changes its journal mode.
pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(from_rusqlite)?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)
        .map_err(from_rusqlite)?;
    Ok(conn)
}

/// Open an in-memory SQLite database (for testing)
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().map_err(from_rusqlite)?;
    configure(&conn)?;
    Ok(conn)
}

/// Configure a connection with optimal settings
pub fn configure(conn: &Connection) -> Result<()> {
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)
        .map_err(from_rusqlite)?;

    // Enable foreign keys
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(from_rusqlite)?;

    // WAL lets `migrate history` read while a run holds the write lock
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(from_rusqlite)?;

    Ok(())
}

/// Run `f` with the busy timeout capped at `limit`
///
/// The connection returns to `DEFAULT_BUSY_TIMEOUT` afterwards, whether or
/// not `f` succeeded.
pub fn with_busy_timeout<T>(
    conn: &mut Connection,
    limit: Duration,
    f: impl FnOnce(&mut Connection) -> Result<T>,
) -> Result<T> {
    conn.busy_timeout(limit.min(DEFAULT_BUSY_TIMEOUT))
        .map_err(from_rusqlite)?;
    let result = f(conn);
    let restored = conn
        .busy_timeout(DEFAULT_BUSY_TIMEOUT)
        .map_err(from_rusqlite);
    let value = result?;
    restored?;
    Ok(value)
}

/// Whether a table exists in the main schema
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [table],
        |row| row.get(0),
    )
    .map_err(from_rusqlite)
}
