//! Progress hooks
//!
//! The Runner reports each planned, started, finished and failed unit to a
//! `ProgressSink`. The CLI prints one line per unit from these callbacks;
//! tests record them to assert ordering.

use crate::runner::Direction;
use migrex_core::errors::ExError;
use migrex_core::MigrationId;
use std::time::Duration;

/// Observer of a run's per-unit progress
///
/// Every method has an empty default so implementors only override what
/// they need.
pub trait ProgressSink {
    /// Called once after planning with the units the run will attempt
    fn on_plan(&self, _direction: Direction, _ids: &[&MigrationId]) {}

    fn on_unit_start(&self, _direction: Direction, _id: &MigrationId) {}

    fn on_unit_success(&self, _direction: Direction, _id: &MigrationId, _elapsed: Duration) {}

    fn on_unit_failure(&self, _direction: Direction, _id: &MigrationId, _err: &ExError) {}

    /// An applied identifier that the registry no longer defines
    fn on_orphan(&self, _id: &MigrationId) {}
}

/// Sink that ignores every callback
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {}
