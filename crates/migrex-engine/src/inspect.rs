//! Read-only inspection
//!
//! History, status and dry-run planning never take the run lock and never
//! create tables, so they are safe to run against a database another process
//! is migrating.

use crate::runner::Runner;
use chrono::{DateTime, Utc};
use migrex_core::{log_op_end, log_op_error, log_op_start};
use migrex_core::{plan_up, MigrationId, UpPlan};
use migrex_store::errors::Result;
use migrex_store::LockInfo;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Instant;

/// How a ledger entry relates to the compiled registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Applied,
    /// The registry no longer defines this identifier
    Orphaned,
    /// The stored checksum differs from the compiled unit's
    Modified,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Applied => "applied",
            EntryStatus::Orphaned => "orphaned",
            EntryStatus::Modified => "modified",
        }
    }
}

/// A ledger entry joined against the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub id: MigrationId,
    pub applied_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub checksum: Option<String>,
    pub status: EntryStatus,
    pub description: Option<String>,
}

/// Summary for `migrate status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub applied: usize,
    pub pending: Vec<MigrationId>,
    pub orphans: Vec<MigrationId>,
    pub modified: Vec<MigrationId>,
    pub lock: Option<LockInfo>,
}

impl<'a> Runner<'a> {
    /// Ledger entries, oldest first, each with its registry status
    ///
    /// Returns an empty list if the ledger table has never been created.
    pub fn history(&self, conn: &Connection) -> Result<Vec<HistoryEntry>> {
        log_op_start!("migrate_history");
        let start = Instant::now();

        let result = self.history_impl(conn);

        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(entries) => {
                log_op_end!(
                    "migrate_history",
                    duration_ms = duration_ms,
                    entries = entries.len() as u64
                );
            }
            Err(err) => log_op_error!("migrate_history", err.clone(), duration_ms = duration_ms),
        }
        result
    }

    fn history_impl(&self, conn: &Connection) -> Result<Vec<HistoryEntry>> {
        if !self.ledger.exists(conn)? {
            return Ok(Vec::new());
        }

        let entries = self.ledger.entries(conn)?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                let unit = self.registry.get(entry.id.as_str());
                let status = match unit {
                    None => EntryStatus::Orphaned,
                    Some(unit) => match (unit.checksum(), entry.checksum.as_deref()) {
                        (Some(compiled), Some(recorded)) if compiled != recorded => {
                            EntryStatus::Modified
                        }
                        _ => EntryStatus::Applied,
                    },
                };
                HistoryEntry {
                    description: unit.and_then(|u| u.description()).map(str::to_string),
                    id: entry.id,
                    applied_at: entry.applied_at,
                    duration_ms: entry.duration_ms,
                    checksum: entry.checksum,
                    status,
                }
            })
            .collect())
    }

    /// Applied count, pending units, drift and the current lock holder
    pub fn status(&self, conn: &Connection) -> Result<StatusReport> {
        let history = self.history(conn)?;
        let applied: BTreeSet<MigrationId> = history.iter().map(|e| e.id.clone()).collect();
        let plan = plan_up(self.registry, &applied, None)?;

        let with_status = |status: EntryStatus| -> Vec<MigrationId> {
            history
                .iter()
                .filter(|e| e.status == status)
                .map(|e| e.id.clone())
                .collect()
        };

        Ok(StatusReport {
            applied: history.len(),
            pending: plan.pending.iter().map(|u| u.id().clone()).collect(),
            orphans: with_status(EntryStatus::Orphaned),
            modified: with_status(EntryStatus::Modified),
            lock: self.lock.current(conn)?,
        })
    }

    /// What `up` would apply right now, without locking or writing
    ///
    /// # Errors
    ///
    /// `ExErrorKind::UnknownTarget` if `target` is not registered.
    pub fn plan_up(&self, conn: &Connection, target: Option<&MigrationId>) -> Result<UpPlan<'a>> {
        let applied = if self.ledger.exists(conn)? {
            self.ledger.applied_identifiers(conn)?
        } else {
            BTreeSet::new()
        };
        Ok(plan_up(self.registry, &applied, target)?)
    }

    /// Remove the run lock regardless of holder
    ///
    /// Returns the lock that was removed, if any.
    pub fn force_unlock(&self, conn: &Connection) -> Result<Option<LockInfo>> {
        let removed = self.lock.force_release(conn)?;
        if let Some(info) = &removed {
            tracing::warn!(
                holder = %info.holder,
                expires_at = %info.expires_at.to_rfc3339(),
                "Force-released run lock"
            );
        }
        Ok(removed)
    }
}
