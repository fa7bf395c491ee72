//! Applied-history ledger
//!
//! One row per successfully applied unit. Rows are inserted on apply and
//! deleted on revert; they are never updated in place. All methods take a
//! `&Connection` so they can run inside a unit's open transaction.

use crate::db::table_exists;
use crate::errors::{contended, corrupt_row, persistence, Result};
use crate::tables::TableNames;
use chrono::{DateTime, TimeZone, Utc};
use migrex_core::errors::{ExError, MigrexError};
use migrex_core::MigrationId;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::BTreeSet;

/// A ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub id: MigrationId,
    pub applied_at: DateTime<Utc>,
    /// Checksum of the unit at apply time (SQL units only)
    pub checksum: Option<String>,
    pub duration_ms: u64,
}

impl LedgerEntry {
    pub fn new(id: MigrationId, applied_at: DateTime<Utc>) -> Self {
        Self {
            id,
            applied_at,
            checksum: None,
            duration_ms: 0,
        }
    }

    pub fn with_checksum(mut self, checksum: Option<String>) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// Ledger table accessor
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Ledger {
    pub fn new(tables: &TableNames) -> Self {
        Self {
            table: tables.ledger().to_string(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Ensure the ledger table exists; a no-op when it already does
    pub fn initialize(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                identifier TEXT PRIMARY KEY NOT NULL,
                applied_at INTEGER NOT NULL,
                checksum TEXT,
                duration_ms INTEGER NOT NULL DEFAULT 0
            )",
            self.table
        ))
        .map_err(|e| contended("ledger_initialize", e))
    }

    /// Whether `initialize` has ever run against this database
    pub fn exists(&self, conn: &Connection) -> Result<bool> {
        table_exists(conn, &self.table)
    }

    /// The complete set of applied identifiers
    pub fn applied_identifiers(&self, conn: &Connection) -> Result<BTreeSet<MigrationId>> {
        Ok(self.entries(conn)?.into_iter().map(|e| e.id).collect())
    }

    /// All entries, oldest first
    ///
    /// Ordered by `applied_at`, then by insertion order for entries recorded
    /// within the same millisecond.
    pub fn entries(&self, conn: &Connection) -> Result<Vec<LedgerEntry>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT identifier, applied_at, checksum, duration_ms FROM {}
                 ORDER BY applied_at ASC, rowid ASC",
                self.table
            ))
            .map_err(|e| persistence("ledger_entries", e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .map_err(|e| persistence("ledger_entries", e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| persistence("ledger_entries", e))?;

        rows.into_iter()
            .map(|(id, applied_at_ms, checksum, duration_ms)| {
                let id = MigrationId::parse(id)
                    .map_err(|e| corrupt_row(&self.table, &e.to_string()))?;
                let applied_at = Utc
                    .timestamp_millis_opt(applied_at_ms)
                    .single()
                    .ok_or_else(|| {
                        corrupt_row(
                            &self.table,
                            &format!("applied_at {} out of range", applied_at_ms),
                        )
                    })?;
                Ok(LedgerEntry {
                    id,
                    applied_at,
                    checksum,
                    duration_ms: u64::try_from(duration_ms).unwrap_or(0),
                })
            })
            .collect()
    }

    /// Add one entry
    ///
    /// # Errors
    ///
    /// `ExErrorKind::AlreadyRecorded` if the identifier is already present.
    pub fn record_applied(&self, conn: &Connection, entry: &LedgerEntry) -> Result<()> {
        let inserted = conn
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (identifier, applied_at, checksum, duration_ms)
                     VALUES (?1, ?2, ?3, ?4)",
                    self.table
                ),
                params![
                    entry.id.as_str(),
                    entry.applied_at.timestamp_millis(),
                    entry.checksum,
                    i64::try_from(entry.duration_ms).unwrap_or(i64::MAX),
                ],
            )
            .map_err(|e| persistence("ledger_record_applied", e))?;

        if inserted == 0 {
            return Err(ExError::from(MigrexError::AlreadyRecorded {
                id: entry.id.to_string(),
            })
            .with_op("ledger_record_applied"));
        }

        tracing::debug!(migration_id = %entry.id, "Recorded ledger entry");
        Ok(())
    }

    /// Delete one entry
    ///
    /// # Errors
    ///
    /// `ExErrorKind::NotRecorded` if the identifier is absent.
    pub fn remove_applied(&self, conn: &Connection, id: &MigrationId) -> Result<()> {
        let deleted = conn
            .execute(
                &format!("DELETE FROM {} WHERE identifier = ?1", self.table),
                [id.as_str()],
            )
            .map_err(|e| persistence("ledger_remove_applied", e))?;

        if deleted == 0 {
            return Err(ExError::from(MigrexError::NotRecorded { id: id.to_string() })
                .with_op("ledger_remove_applied"));
        }

        tracing::debug!(migration_id = %id, "Removed ledger entry");
        Ok(())
    }
}
