//! Migration runner
//!
//! ## Run pipeline (in order):
//! 1. LOCKING: ensure the ledger and lock tables exist, then acquire the
//!    run lock. `LockHeld` stops the run here, including when another
//!    writer keeps the database busy past `lock_timeout`
//! 2. PLANNING: diff the registry against the ledger
//! 3. EXECUTING: per unit, renew the lease, open a scope, run the step,
//!    confirm the lease is still ours, write the ledger, commit. A heartbeat
//!    renews from a second connection while a unit runs. The first failure
//!    rolls back and stops
//! 4. COMMITTED or FAILED, then the lock is released on every exit path,
//!    including a panic inside a unit

use crate::progress::{NoopProgress, ProgressSink};
use chrono::Utc;
use migrex_core::errors::{ExError, MigrexError};
use migrex_core::plan::orphans;
use migrex_core::{log_op_end, log_op_error, log_op_start};
use migrex_core::{
    plan_down, plan_up, DownStep, MigrationContext, MigrationId, MigrationUnit, Registry,
    RevertOutcome,
};
use migrex_core_types::RunId;
use migrex_store::db;
use migrex_store::errors::Result;
use migrex_store::lock::{DEFAULT_LEASE, DEFAULT_POLL_INTERVAL};
use migrex_store::{
    LeaseHeartbeat, Ledger, LedgerEntry, LockToken, RunLock, ScopeMode, TableNames, UnitScope,
};
use rusqlite::Connection;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

static NOOP_PROGRESS: NoopProgress = NoopProgress;

/// Knobs for a Runner
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Prefix for the ledger and lock tables, and for `{prefix}` in SQL units
    pub table_prefix: String,
    /// How long to wait for a held run lock
    pub lock_timeout: Duration,
    /// Lease length written on acquire and on every renew
    pub lock_lease: Duration,
    /// Delay between lock acquisition attempts
    pub poll_interval: Duration,
    pub scope_mode: ScopeMode,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            table_prefix: String::new(),
            lock_timeout: Duration::from_secs(10),
            lock_lease: DEFAULT_LEASE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            scope_mode: ScopeMode::Transactional,
        }
    }
}

/// Runner state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Locking,
    Planning,
    Executing,
    Committed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

/// One unit the run finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitOutcome {
    pub id: MigrationId,
    pub duration_ms: u64,
}

/// Result of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub direction: Direction,
    /// Units applied (up) or reverted (down), in execution order
    pub completed: Vec<UnitOutcome>,
    /// Applied identifiers with no definition in the registry
    pub orphans: Vec<MigrationId>,
}

impl RunReport {
    pub fn completed_ids(&self) -> Vec<&MigrationId> {
        self.completed.iter().map(|o| &o.id).collect()
    }
}

/// Migration executor bound to one registry
pub struct Runner<'a> {
    pub(crate) registry: &'a Registry,
    pub(crate) options: RunnerOptions,
    pub(crate) tables: TableNames,
    pub(crate) ledger: Ledger,
    pub(crate) lock: RunLock,
    progress: &'a dyn ProgressSink,
    state: RunState,
    transitions: Vec<RunState>,
}

impl<'a> Runner<'a> {
    /// Create a runner
    ///
    /// # Errors
    ///
    /// `ExErrorKind::Config` if the table prefix is not made of ASCII
    /// letters, digits and `_`.
    pub fn new(registry: &'a Registry, options: RunnerOptions) -> Result<Self> {
        let tables = TableNames::with_prefix(&options.table_prefix)?;
        let ledger = Ledger::new(&tables);
        let lock = RunLock::new(&tables, options.lock_lease)
            .with_poll_interval(options.poll_interval);

        Ok(Self {
            registry,
            options,
            tables,
            ledger,
            lock,
            progress: &NOOP_PROGRESS,
            state: RunState::Idle,
            transitions: vec![RunState::Idle],
        })
    }

    /// Report per-unit progress to `progress`
    pub fn with_progress(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Current state; `Idle` between runs
    pub fn state(&self) -> RunState {
        self.state
    }

    /// States visited by the most recent run, starting from `Idle`
    pub fn transitions(&self) -> &[RunState] {
        &self.transitions
    }

    /// Apply every pending unit, or the pending prefix up to `target`
    ///
    /// # Errors
    ///
    /// - `ExErrorKind::LockHeld` if another run holds the lock
    /// - `ExErrorKind::UnknownTarget` if `target` is not registered
    /// - `ExErrorKind::UnitExecutionFailure` if a unit fails; the error names
    ///   the unit and lists the units applied before it
    /// - `ExErrorKind::LockLost` if the lease was reclaimed mid-run
    pub fn up(&mut self, conn: &mut Connection, target: Option<&MigrationId>) -> Result<RunReport> {
        let run_id = RunId::new();
        log_op_start!(
            "migrate_up",
            run_id = %run_id,
            target = target.map_or("", MigrationId::as_str)
        );
        let start = Instant::now();

        let result = self.run(conn, &run_id, |runner, conn, token| {
            runner.up_impl(conn, &run_id, token, target)
        });

        self.finish("migrate_up", start, result)
    }

    /// Revert the `step` most recently applied units
    ///
    /// # Errors
    ///
    /// - `ExErrorKind::InvalidInput` if `step` is zero
    /// - `ExErrorKind::LockHeld` if another run holds the lock
    /// - `ExErrorKind::Irreversible` when the walk reaches a unit without a
    ///   down step; units reverted before it stay reverted
    /// - `ExErrorKind::MissingDefinition` when the walk reaches an orphan
    /// - `ExErrorKind::UnitExecutionFailure` if a down step fails
    pub fn down(&mut self, conn: &mut Connection, step: usize) -> Result<RunReport> {
        let run_id = RunId::new();
        log_op_start!("migrate_down", run_id = %run_id, step = step as u64);
        let start = Instant::now();

        let result = if step == 0 {
            Err(ExError::from(MigrexError::InvalidInput {
                reason: "step count must be at least 1".to_string(),
            })
            .with_op("migrate_down"))
        } else {
            self.run(conn, &run_id, |runner, conn, token| {
                runner.down_impl(conn, &run_id, token, step)
            })
        };

        self.finish("migrate_down", start, result)
    }

    fn finish(
        &self,
        op: &'static str,
        start: Instant,
        result: Result<RunReport>,
    ) -> Result<RunReport> {
        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(report) => {
                log_op_end!(
                    op,
                    duration_ms = duration_ms,
                    run_id = %report.run_id,
                    completed = report.completed.len() as u64
                );
            }
            Err(err) => log_op_error!(
                op,
                err.clone(),
                duration_ms = duration_ms,
                migration_id = err.migration_id().unwrap_or("")
            ),
        }
        result
    }

    fn transition(&mut self, next: RunState) {
        tracing::debug!(from = ?self.state, to = ?next, "Runner state transition");
        self.state = next;
        self.transitions.push(next);
    }

    /// Hold the run lock around `body`
    ///
    /// The lock is released whether `body` returns or panics; a panic is
    /// resumed after release.
    fn run<T>(
        &mut self,
        conn: &mut Connection,
        run_id: &RunId,
        body: impl FnOnce(&mut Self, &mut Connection, &mut LockToken) -> Result<T>,
    ) -> Result<T> {
        self.state = RunState::Idle;
        self.transitions = vec![RunState::Idle];

        self.transition(RunState::Locking);
        let holder = run_id.holder();
        let timeout = self.options.lock_timeout;
        let acquired = db::with_busy_timeout(conn, timeout, |conn| {
            self.ledger.initialize(conn)?;
            self.lock.initialize(conn)
        })
        .and_then(|()| self.lock.acquire(conn, &holder, timeout));
        let mut token = match acquired {
            Ok(token) => token,
            Err(err) => {
                self.transition(RunState::Failed);
                self.transition(RunState::Idle);
                return Err(err.with_run_id(run_id.clone()));
            }
        };

        let heartbeat = self.start_heartbeat(conn, &token);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(self, conn, &mut token)));
        if let Some(heartbeat) = heartbeat {
            heartbeat.stop();
        }

        match self.lock.release(conn, &token) {
            Ok(true) => tracing::debug!(holder = %holder, "Released run lock"),
            Ok(false) => tracing::warn!(
                holder = %holder,
                "Run lock was reclaimed by another holder before release"
            ),
            Err(err) => tracing::warn!(holder = %holder, error = %err, "Failed to release run lock"),
        }

        match outcome {
            Ok(Ok(value)) => {
                self.transition(RunState::Committed);
                self.transition(RunState::Idle);
                Ok(value)
            }
            Ok(Err(err)) => {
                self.transition(RunState::Failed);
                self.transition(RunState::Idle);
                Err(err.with_run_id(run_id.clone()))
            }
            Err(payload) => {
                self.transition(RunState::Failed);
                self.transition(RunState::Idle);
                panic::resume_unwind(payload)
            }
        }
    }

    /// Renew the lease in the background for file databases
    ///
    /// In-memory databases have no second connection to renew from; a run
    /// there cannot be contended anyway.
    fn start_heartbeat(&self, conn: &Connection, token: &LockToken) -> Option<LeaseHeartbeat> {
        let path = conn.path().filter(|p| !p.is_empty())?.to_string();
        match self.lock.start_heartbeat(&path, token) {
            Ok(heartbeat) => Some(heartbeat),
            Err(err) => {
                tracing::warn!(
                    holder = %token.holder(),
                    error = %err,
                    "Lease heartbeat unavailable; renewing between units only"
                );
                None
            }
        }
    }

    fn up_impl(
        &mut self,
        conn: &mut Connection,
        run_id: &RunId,
        token: &mut LockToken,
        target: Option<&MigrationId>,
    ) -> Result<RunReport> {
        self.transition(RunState::Planning);
        let registry = self.registry;
        let applied = self.ledger.applied_identifiers(conn)?;
        let plan = plan_up(registry, &applied, target)?;

        for orphan in &plan.orphans {
            tracing::warn!(
                run_id = %run_id,
                migration_id = %orphan,
                "Applied migration has no definition in the registry"
            );
            self.progress.on_orphan(orphan);
        }
        self.progress.on_plan(Direction::Up, &plan.pending_ids());

        self.transition(RunState::Executing);
        let mut completed = Vec::with_capacity(plan.pending.len());
        for unit in plan.pending {
            match self.apply_unit(conn, run_id, token, unit) {
                Ok(outcome) => completed.push(outcome),
                Err(err) => return Err(self.stopped(Direction::Up, unit.id(), err, &completed)),
            }
        }

        Ok(RunReport {
            run_id: run_id.clone(),
            direction: Direction::Up,
            completed,
            orphans: plan.orphans,
        })
    }

    fn down_impl(
        &mut self,
        conn: &mut Connection,
        run_id: &RunId,
        token: &mut LockToken,
        step: usize,
    ) -> Result<RunReport> {
        self.transition(RunState::Planning);
        let registry = self.registry;
        let applied: Vec<MigrationId> = self
            .ledger
            .entries(conn)?
            .into_iter()
            .map(|entry| entry.id)
            .collect();
        let plan = plan_down(registry, &applied, step)?;

        let planned: Vec<&MigrationId> = plan.steps.iter().map(DownStep::id).collect();
        self.progress.on_plan(Direction::Down, &planned);

        self.transition(RunState::Executing);
        let mut completed = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            let result = match step {
                DownStep::Revert(unit) => self.revert_unit(conn, run_id, token, unit),
                DownStep::Irreversible(unit) => Err(ExError::from(MigrexError::Irreversible {
                    id: unit.id().to_string(),
                })
                .with_op("revert_unit")),
                DownStep::MissingDefinition(id) => {
                    Err(ExError::from(MigrexError::MissingDefinition { id: id.to_string() })
                        .with_op("revert_unit"))
                }
            };
            match result {
                Ok(outcome) => completed.push(outcome),
                Err(err) => return Err(self.stopped(Direction::Down, step.id(), err, &completed)),
            }
        }

        Ok(RunReport {
            run_id: run_id.clone(),
            direction: Direction::Down,
            completed,
            orphans: orphans(registry, &applied),
        })
    }

    /// Attach the failing identifier and the completed prefix to a failure
    fn stopped(
        &self,
        direction: Direction,
        id: &MigrationId,
        err: ExError,
        completed: &[UnitOutcome],
    ) -> ExError {
        let err = if err.migration_id().is_none() {
            err.with_migration_id(id.as_str())
        } else {
            err
        };
        self.progress.on_unit_failure(direction, id, &err);
        err.with_completed(completed.iter().map(|o| o.id.to_string()).collect())
    }

    fn apply_unit(
        &self,
        conn: &mut Connection,
        run_id: &RunId,
        token: &mut LockToken,
        unit: &MigrationUnit,
    ) -> Result<UnitOutcome> {
        log_op_start!("apply_unit", run_id = %run_id, migration_id = %unit.id());
        self.progress.on_unit_start(Direction::Up, unit.id());
        let start = Instant::now();

        let result = self.apply_unit_impl(conn, run_id, token, unit, start);

        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => {
                log_op_end!(
                    "apply_unit",
                    duration_ms = duration_ms,
                    run_id = %run_id,
                    migration_id = %unit.id()
                );
                self.progress
                    .on_unit_success(Direction::Up, unit.id(), start.elapsed());
            }
            Err(err) => log_op_error!(
                "apply_unit",
                err.clone(),
                duration_ms = duration_ms,
                run_id = %run_id,
                migration_id = %unit.id()
            ),
        }
        result
    }

    fn apply_unit_impl(
        &self,
        conn: &mut Connection,
        run_id: &RunId,
        token: &mut LockToken,
        unit: &MigrationUnit,
        start: Instant,
    ) -> Result<UnitOutcome> {
        self.lock.renew(conn, token)?;

        let mode = self.options.scope_mode.for_unit(unit.is_transactional());
        let scope = UnitScope::open(conn, mode)?;
        let applied = {
            let ctx = MigrationContext::new(scope.conn(), self.tables.prefix(), run_id);
            unit.apply(&ctx)
        };
        if let Err(cause) = applied {
            discard(scope, unit.id());
            return Err(ExError::from(MigrexError::unit_failure(unit.id().as_str(), &cause))
                .with_op("apply_unit"));
        }

        // a lease reclaimed mid-unit means another run may apply it too
        if let Err(err) = self.lock.renew(scope.conn(), token) {
            discard(scope, unit.id());
            return Err(err);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let entry = LedgerEntry::new(unit.id().clone(), Utc::now())
            .with_checksum(unit.checksum().map(str::to_string))
            .with_duration_ms(duration_ms);
        self.ledger.record_applied(scope.conn(), &entry)?;
        scope.commit()?;

        Ok(UnitOutcome {
            id: unit.id().clone(),
            duration_ms,
        })
    }

    fn revert_unit(
        &self,
        conn: &mut Connection,
        run_id: &RunId,
        token: &mut LockToken,
        unit: &MigrationUnit,
    ) -> Result<UnitOutcome> {
        log_op_start!("revert_unit", run_id = %run_id, migration_id = %unit.id());
        self.progress.on_unit_start(Direction::Down, unit.id());
        let start = Instant::now();

        let result = self.revert_unit_impl(conn, run_id, token, unit);

        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => {
                log_op_end!(
                    "revert_unit",
                    duration_ms = duration_ms,
                    run_id = %run_id,
                    migration_id = %unit.id()
                );
                self.progress
                    .on_unit_success(Direction::Down, unit.id(), start.elapsed());
            }
            Err(err) => log_op_error!(
                "revert_unit",
                err.clone(),
                duration_ms = duration_ms,
                run_id = %run_id,
                migration_id = %unit.id()
            ),
        }
        result.map(|()| UnitOutcome {
            id: unit.id().clone(),
            duration_ms,
        })
    }

    fn revert_unit_impl(
        &self,
        conn: &mut Connection,
        run_id: &RunId,
        token: &mut LockToken,
        unit: &MigrationUnit,
    ) -> Result<()> {
        self.lock.renew(conn, token)?;

        let mode = self.options.scope_mode.for_unit(unit.is_transactional());
        let scope = UnitScope::open(conn, mode)?;
        let outcome = {
            let ctx = MigrationContext::new(scope.conn(), self.tables.prefix(), run_id);
            unit.revert(&ctx)
        };

        match outcome {
            RevertOutcome::Reverted => {}
            RevertOutcome::Failed(cause) => {
                discard(scope, unit.id());
                return Err(
                    ExError::from(MigrexError::unit_failure(unit.id().as_str(), &cause))
                        .with_op("revert_unit"),
                );
            }
            RevertOutcome::Unsupported => {
                discard(scope, unit.id());
                return Err(ExError::from(MigrexError::Irreversible {
                    id: unit.id().to_string(),
                })
                .with_op("revert_unit"));
            }
        }

        if let Err(err) = self.lock.renew(scope.conn(), token) {
            discard(scope, unit.id());
            return Err(err);
        }

        self.ledger.remove_applied(scope.conn(), unit.id())?;
        scope.commit()
    }
}

/// Roll back a failed unit's scope
fn discard(scope: UnitScope<'_>, id: &MigrationId) {
    match scope.rollback() {
        Ok(true) => tracing::debug!(migration_id = %id, "Rolled back failed unit"),
        Ok(false) => tracing::warn!(
            migration_id = %id,
            "Unit ran without a transaction; its partial effects remain"
        ),
        Err(err) => tracing::warn!(migration_id = %id, error = %err, "Rollback failed"),
    }
}
