//! Run and inspection commands
//!
//! Every command builds a `Runner` over the compiled catalog and goes through
//! `apply_engine_command`. Read-only commands open the database without
//! creating it; a database that does not exist yet reads as empty.

use crate::catalog;
use crate::config::MigrexConfig;
use clap::Args;
use migrex_core::errors::{ExError, ExErrorKind};
use migrex_core::MigrationId;
use migrex_engine::commands::{apply_engine_command, EngineCommand, EngineCommandResult};
use migrex_engine::{Direction, HistoryEntry, NoopProgress, ProgressSink, Runner, StatusReport};
use migrex_store::db;
use rusqlite::Connection;
use std::time::Duration;

#[derive(Debug, Args)]
pub struct UpArgs {
    /// Apply pending migrations up to and including this identifier
    #[arg(long = "to", value_name = "ID")]
    pub to: Option<String>,

    /// Print what would be applied without locking or writing
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct DownArgs {
    /// Number of most recently applied migrations to revert
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    pub step: u64,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Emit the history as JSON
    #[arg(long)]
    pub json: bool,
}

/// Prints one line per unit attempted
struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn on_plan(&self, direction: Direction, ids: &[&MigrationId]) {
        if ids.is_empty() {
            match direction {
                Direction::Up => println!("Nothing to apply"),
                Direction::Down => println!("Nothing to revert"),
            }
        }
    }

    fn on_unit_success(&self, direction: Direction, id: &MigrationId, elapsed: Duration) {
        let verb = match direction {
            Direction::Up => "applied",
            Direction::Down => "reverted",
        };
        println!("{:<9} {} ({} ms)", verb, id, elapsed.as_millis());
    }

    fn on_unit_failure(&self, _direction: Direction, id: &MigrationId, err: &ExError) {
        println!("{:<9} {} [{}]", "failed", id, err.code());
    }

    fn on_orphan(&self, id: &MigrationId) {
        eprintln!("warning: {} is applied but not defined in this build", id);
    }
}

pub fn execute_up(args: UpArgs, config: &MigrexConfig) -> Result<(), ExError> {
    let target = args.to.map(MigrationId::parse).transpose()?;

    if args.dry_run {
        let conn = open_for_reading(config)?;
        return match dispatch(config, EngineCommand::Plan { target }, conn, &NoopProgress)? {
            EngineCommandResult::Planned { pending, orphans } => {
                for id in &orphans {
                    eprintln!("warning: {} is applied but not defined in this build", id);
                }
                if pending.is_empty() {
                    println!("Nothing to apply (dry run)");
                } else {
                    println!("Would apply {} migration(s):", pending.len());
                    for id in &pending {
                        println!("  {}", id);
                    }
                }
                Ok(())
            }
            other => Err(unexpected(other)),
        };
    }

    let conn = db::open(&config.database)?;
    match dispatch(config, EngineCommand::Up { target }, conn, &ConsoleProgress)? {
        EngineCommandResult::Applied(report) => {
            println!(
                "Applied {} migration(s) (run {})",
                report.completed.len(),
                report.run_id
            );
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

pub fn execute_down(args: DownArgs, config: &MigrexConfig) -> Result<(), ExError> {
    let step = usize::try_from(args.step).unwrap_or(usize::MAX);
    let conn = db::open(&config.database)?;
    match dispatch(config, EngineCommand::Down { step }, conn, &ConsoleProgress)? {
        EngineCommandResult::Reverted(report) => {
            println!(
                "Reverted {} migration(s) (run {})",
                report.completed.len(),
                report.run_id
            );
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

pub fn execute_history(args: HistoryArgs, config: &MigrexConfig) -> Result<(), ExError> {
    let conn = open_for_reading(config)?;
    let entries = match dispatch(config, EngineCommand::History, conn, &NoopProgress)? {
        EngineCommandResult::History(entries) => entries,
        other => return Err(unexpected(other)),
    };

    if args.json {
        let json = serde_json::to_string_pretty(&entries).map_err(|e| {
            ExError::new(ExErrorKind::Serialization)
                .with_op("migrate_history")
                .with_message(e.to_string())
        })?;
        println!("{}", json);
    } else {
        print_history(&entries);
    }
    Ok(())
}

fn print_history(entries: &[HistoryEntry]) {
    if entries.is_empty() {
        println!("No migrations applied");
        return;
    }
    for entry in entries {
        let mut line = format!(
            "{}  {:<8}  {}  ({} ms)",
            entry.applied_at.format("%Y-%m-%d %H:%M:%S"),
            entry.status.as_str(),
            entry.id,
            entry.duration_ms
        );
        if let Some(description) = &entry.description {
            line.push_str(" - ");
            line.push_str(description);
        }
        println!("{}", line);
    }
}

pub fn execute_status(config: &MigrexConfig) -> Result<(), ExError> {
    let conn = open_for_reading(config)?;
    match dispatch(config, EngineCommand::Status, conn, &NoopProgress)? {
        EngineCommandResult::Status(report) => {
            print_status(config, &report);
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

fn print_status(config: &MigrexConfig, report: &StatusReport) {
    println!("Database: {}", config.database.display());
    println!("Applied:  {}", report.applied);
    println!("Pending:  {}", report.pending.len());
    for id in &report.pending {
        println!("  {}", id);
    }
    for id in &report.orphans {
        println!("warning: {} is applied but not defined in this build", id);
    }
    for id in &report.modified {
        println!("warning: {} changed since it was applied", id);
    }
    match &report.lock {
        Some(lock) => println!(
            "Lock:     held by {} until {}",
            lock.holder,
            lock.expires_at.to_rfc3339()
        ),
        None => println!("Lock:     free"),
    }
}

pub fn execute_unlock(config: &MigrexConfig) -> Result<(), ExError> {
    let conn = open_for_reading(config)?;
    match dispatch(config, EngineCommand::Unlock, conn, &NoopProgress)? {
        EngineCommandResult::Unlocked(Some(lock)) => {
            println!(
                "Released run lock held by {} (acquired {})",
                lock.holder,
                lock.acquired_at.to_rfc3339()
            );
            Ok(())
        }
        EngineCommandResult::Unlocked(None) => {
            println!("No run lock held");
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

fn open_for_reading(config: &MigrexConfig) -> Result<Connection, ExError> {
    if config.database.exists() {
        db::open_existing(&config.database)
    } else {
        db::open_in_memory()
    }
}

fn dispatch(
    config: &MigrexConfig,
    cmd: EngineCommand,
    mut conn: Connection,
    progress: &dyn ProgressSink,
) -> Result<EngineCommandResult, ExError> {
    let registry = catalog::registry()?;
    let mut runner = Runner::new(&registry, config.runner_options())?.with_progress(progress);
    apply_engine_command(cmd, &mut runner, &mut conn)
}

fn unexpected(result: EngineCommandResult) -> ExError {
    ExError::new(ExErrorKind::Internal)
        .with_message(format!("Unexpected engine result: {:?}", result))
}
