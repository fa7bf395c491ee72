//! Error handling for migrex-store
//!
//! Wraps migrex-core ExError with store-specific helpers

use migrex_core::errors::{ExError, ExErrorKind, MigrexError};
use rusqlite::ErrorCode;

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

/// Create a database error from rusqlite::Error
pub fn from_rusqlite(err: rusqlite::Error) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("sqlite")
        .with_message(err.to_string())
}

/// Create a database error tagged with the failing operation
pub fn persistence(op: &str, err: rusqlite::Error) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op(op.to_string())
        .with_message(err.to_string())
}

/// Create an error for a write blocked by another connection
///
/// SQLITE_BUSY while setting up a run means another writer, usually another
/// run, holds the database. It is reported as `LockHeld` so callers treat it
/// like any held run lock; other failures stay `Persistence`.
pub fn contended(op: &str, err: rusqlite::Error) -> ExError {
    if !is_busy(&err) {
        return persistence(op, err);
    }
    ExError::from(MigrexError::LockHeld {
        holder: "unknown".to_string(),
        expires_at: "unknown".to_string(),
    })
    .with_op(op.to_string())
    .with_message("Database is locked by another writer")
    .with_source(persistence(op, err))
}

/// Whether SQLite refused the statement because another connection holds a lock
pub(crate) fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Create an IO error
pub fn io_error(operation: &str, err: std::io::Error) -> ExError {
    ExError::new(ExErrorKind::Io)
        .with_op(operation.to_string())
        .with_message(err.to_string())
}

/// Create an invalid table prefix error
pub fn invalid_prefix(prefix: &str) -> ExError {
    ExError::new(ExErrorKind::Config)
        .with_op("table_names")
        .with_message(format!(
            "Invalid table prefix {:?}: only ASCII letters, digits and '_' are allowed",
            prefix
        ))
}

/// Create an error for a stored row that cannot be decoded
pub fn corrupt_row(table: &str, reason: &str) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("decode_row")
        .with_message(format!("Corrupt row in {}: {}", table, reason))
}
