//! Engine-level commands dispatched by the CLI.

use crate::inspect::{HistoryEntry, StatusReport};
use crate::runner::{RunReport, Runner};
use migrex_core::MigrationId;
use migrex_store::errors::Result;
use migrex_store::LockInfo;
use rusqlite::Connection;

/// Commands that operate on a database through a `Runner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// Apply pending units, optionally only up to `target` inclusive.
    Up { target: Option<MigrationId> },
    /// Report what `Up` would apply, without locking or writing.
    Plan { target: Option<MigrationId> },
    /// Revert the `step` most recently applied units.
    Down { step: usize },
    History,
    Status,
    /// Force-release the run lock.
    Unlock,
}

/// Result of applying an engine command.
#[derive(Debug, Clone)]
pub enum EngineCommandResult {
    Applied(RunReport),
    Planned {
        pending: Vec<MigrationId>,
        orphans: Vec<MigrationId>,
    },
    Reverted(RunReport),
    History(Vec<HistoryEntry>),
    Status(StatusReport),
    /// The lock that was removed, if one was held.
    Unlocked(Option<LockInfo>),
}

/// Apply an engine command.
pub fn apply_engine_command(
    cmd: EngineCommand,
    runner: &mut Runner<'_>,
    conn: &mut Connection,
) -> Result<EngineCommandResult> {
    match cmd {
        EngineCommand::Up { target } => runner
            .up(conn, target.as_ref())
            .map(EngineCommandResult::Applied),
        EngineCommand::Plan { target } => {
            let plan = runner.plan_up(conn, target.as_ref())?;
            Ok(EngineCommandResult::Planned {
                pending: plan.pending.iter().map(|u| u.id().clone()).collect(),
                orphans: plan.orphans,
            })
        }
        EngineCommand::Down { step } => runner.down(conn, step).map(EngineCommandResult::Reverted),
        EngineCommand::History => runner.history(conn).map(EngineCommandResult::History),
        EngineCommand::Status => runner.status(conn).map(EngineCommandResult::Status),
        EngineCommand::Unlock => runner.force_unlock(conn).map(EngineCommandResult::Unlocked),
    }
}
