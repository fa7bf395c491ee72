//! migrex Engine - Orchestration layer
//!
//! Drives migration runs: takes the run lock, plans against the ledger,
//! executes units one scope at a time and reports progress. Read-only
//! inspection (history, status, dry-run planning) lives alongside.

pub mod commands;
pub mod inspect;
pub mod progress;
pub mod runner;

pub use inspect::{EntryStatus, HistoryEntry, StatusReport};
pub use progress::{NoopProgress, ProgressSink};
pub use runner::{Direction, RunReport, RunState, Runner, RunnerOptions, UnitOutcome};
