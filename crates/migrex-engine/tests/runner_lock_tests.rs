// Test suite for run lock behaviour as seen through the Runner
// Contention, lease expiry, renewal, lost leases and release on every exit path

mod common;

use common::*;
use migrex_core::{ExErrorKind, MigrationContext, MigrationUnit, Registry};
use migrex_engine::{RunState, Runner, RunnerOptions};
use migrex_store::{db, RunLock, ScopeMode, TableNames};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn file_db() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.db");
    (dir, path)
}

fn current_holder(conn: &rusqlite::Connection) -> Option<String> {
    RunLock::new(&TableNames::default(), Duration::from_secs(60))
        .current(conn)
        .unwrap()
        .map(|info| info.holder)
}

#[test]
fn test_held_lock_fails_fast_with_lock_held() {
    // Given: another process holds a live lock
    let (_dir, path) = file_db();
    let mut other = db::open(&path).unwrap();
    let lock = RunLock::new(&TableNames::default(), Duration::from_secs(60));
    lock.initialize(&other).unwrap();
    lock.acquire(&mut other, "other-run@pid1", Duration::ZERO)
        .unwrap();

    let journal = Journal::default();
    let registry = Registry::new(vec![reversible("A", &journal)]).unwrap();
    let mut conn = db::open(&path).unwrap();
    let mut runner = Runner::new(&registry, fast_options()).unwrap();

    // When: up runs with a zero timeout
    let err = runner.up(&mut conn, None).unwrap_err();

    // Then: LockHeld names the holder and nothing was applied
    assert_eq!(err.kind(), ExErrorKind::LockHeld);
    assert!(err.kind().is_retryable());
    assert_eq!(err.holder(), Some("other-run@pid1"));
    assert!(journal.entries().is_empty());
    assert!(ledger_ids(&conn).is_empty());
    assert_eq!(
        runner.transitions(),
        [
            RunState::Idle,
            RunState::Locking,
            RunState::Failed,
            RunState::Idle
        ]
    );

    // And: the other holder's lock is untouched
    assert_eq!(current_holder(&conn).as_deref(), Some("other-run@pid1"));
}

#[test]
fn test_expired_lease_is_reclaimed() {
    let (_dir, path) = file_db();
    let mut crashed = db::open(&path).unwrap();
    let lock = RunLock::new(&TableNames::default(), Duration::from_millis(1));
    lock.initialize(&crashed).unwrap();
    lock.acquire(&mut crashed, "crashed-run@pid1", Duration::ZERO)
        .unwrap();
    std::thread::sleep(Duration::from_millis(20));

    let journal = Journal::default();
    let registry = Registry::new(vec![reversible("A", &journal)]).unwrap();
    let mut conn = db::open(&path).unwrap();
    Runner::new(&registry, fast_options())
        .unwrap()
        .up(&mut conn, None)
        .unwrap();

    assert_eq!(ledger_ids(&conn), vec!["A"]);
    assert!(current_holder(&conn).is_none());
}

#[test]
fn test_lock_is_released_after_success_and_failure() {
    let journal = Journal::default();
    let mut conn = db::open_in_memory().unwrap();

    let ok = Registry::new(vec![reversible("A", &journal)]).unwrap();
    Runner::new(&ok, fast_options())
        .unwrap()
        .up(&mut conn, None)
        .unwrap();
    assert!(current_holder(&conn).is_none());

    let broken = Registry::new(vec![
        reversible("A", &journal),
        failing("B", &journal),
    ])
    .unwrap();
    Runner::new(&broken, fast_options())
        .unwrap()
        .up(&mut conn, None)
        .unwrap_err();
    assert!(current_holder(&conn).is_none());
}

#[test]
fn test_lock_is_released_when_a_unit_panics() {
    let registry = Registry::new(vec![MigrationUnit::new(
        "A_panics",
        |ctx: &MigrationContext<'_>| -> anyhow::Result<()> {
            ctx.conn().execute_batch("CREATE TABLE half_done (x)")?;
            panic!("unit bug");
        },
    )])
    .unwrap();
    let mut conn = db::open_in_memory().unwrap();
    let mut runner = Runner::new(&registry, fast_options()).unwrap();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| runner.up(&mut conn, None)));

    assert!(outcome.is_err(), "the panic propagates to the caller");
    assert_eq!(runner.state(), RunState::Idle);
    assert!(current_holder(&conn).is_none());
    assert!(ledger_ids(&conn).is_empty());
    assert!(!table_exists(&conn, "half_done"), "the open scope rolled back");
}

#[test]
fn test_renewal_keeps_a_long_run_alive() {
    let (_dir, path) = file_db();
    let journal = Journal::default();
    let registry = Registry::new(vec![
        slow("A", &journal, Duration::from_millis(40)),
        slow("B", &journal, Duration::from_millis(40)),
        slow("C", &journal, Duration::from_millis(40)),
    ])
    .unwrap();
    let mut conn = db::open(&path).unwrap();
    let options = RunnerOptions {
        lock_lease: Duration::from_millis(60),
        ..fast_options()
    };

    let report = Runner::new(&registry, options)
        .unwrap()
        .up(&mut conn, None)
        .unwrap();

    assert_eq!(report.completed.len(), 3);
}

#[test]
fn test_lost_lease_stops_the_run() {
    // A unit that steals the lock row simulates another holder reclaiming
    // an expired lease mid-unit
    let journal = Journal::default();
    let thief = MigrationUnit::new(
        "A_steals_lock",
        |ctx: &MigrationContext<'_>| -> anyhow::Result<()> {
            ctx.conn().execute_batch(
                "UPDATE schema_migrations_lock SET holder = 'intruder@pid9' WHERE id = 1",
            )?;
            Ok(())
        },
    );
    let registry = Registry::new(vec![thief, reversible("B", &journal)]).unwrap();
    let mut conn = db::open_in_memory().unwrap();
    let options = RunnerOptions {
        scope_mode: ScopeMode::AutoCommit,
        ..fast_options()
    };

    let err = Runner::new(&registry, options)
        .unwrap()
        .up(&mut conn, None)
        .unwrap_err();

    // the unit whose lease was lost is not recorded and nothing after it runs
    assert_eq!(err.kind(), ExErrorKind::LockLost);
    assert_eq!(err.migration_id(), Some("A_steals_lock"));
    assert!(err.completed().is_empty());
    assert!(ledger_ids(&conn).is_empty());
    assert!(journal.entries().is_empty());
    // the intruder's row is left alone
    assert_eq!(current_holder(&conn).as_deref(), Some("intruder@pid9"));
}

#[test]
fn test_unit_outliving_its_lease_is_applied_once() {
    // Given: an auto-commit unit that runs for six leases
    let (_dir, path) = file_db();
    let journal = Journal::default();
    let registry = Registry::new(vec![slow("A", &journal, Duration::from_millis(600))]).unwrap();
    db::open(&path).unwrap();
    let options = RunnerOptions {
        lock_lease: Duration::from_millis(100),
        lock_timeout: Duration::from_secs(5),
        scope_mode: ScopeMode::AutoCommit,
        ..fast_options()
    };

    // When: a second run starts while the unit is still executing
    let (first, second) = std::thread::scope(|s| {
        let first = s.spawn(|| {
            let mut conn = db::open(&path).unwrap();
            Runner::new(&registry, options.clone())
                .unwrap()
                .up(&mut conn, None)
        });
        std::thread::sleep(Duration::from_millis(200));
        let second = s.spawn(|| {
            let mut conn = db::open(&path).unwrap();
            Runner::new(&registry, options.clone())
                .unwrap()
                .up(&mut conn, None)
        });
        (first.join().unwrap(), second.join().unwrap())
    });

    // Then: the lease held for the whole unit, so the second run waited and
    // found nothing pending
    assert_eq!(first.unwrap().completed.len(), 1);
    assert!(second.unwrap().completed.is_empty());
    assert_eq!(journal.count("up:A"), 1);
    let conn = db::open(&path).unwrap();
    assert_eq!(ledger_ids(&conn), vec!["A"]);
}

#[test]
fn test_busy_database_during_setup_is_lock_held() {
    // Given: a fresh database whose write lock another connection holds
    let (_dir, path) = file_db();
    let writer = db::open(&path).unwrap();
    let mut conn = db::open(&path).unwrap();
    writer.execute_batch("BEGIN IMMEDIATE").unwrap();

    let journal = Journal::default();
    let registry = Registry::new(vec![reversible("A", &journal)]).unwrap();
    let mut runner = Runner::new(&registry, fast_options()).unwrap();

    // When: up runs with a zero lock timeout
    let started = Instant::now();
    let err = runner.up(&mut conn, None).unwrap_err();

    // Then: the run reports a held lock without waiting out the busy timeout
    assert_eq!(err.kind(), ExErrorKind::LockHeld);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(journal.entries().is_empty());
    assert_eq!(
        runner.transitions(),
        [
            RunState::Idle,
            RunState::Locking,
            RunState::Failed,
            RunState::Idle
        ]
    );

    // And: once the writer finishes, the same runner succeeds
    writer.execute_batch("COMMIT").unwrap();
    assert_eq!(runner.up(&mut conn, None).unwrap().completed.len(), 1);
}

#[test]
fn test_concurrent_runs_apply_each_unit_once() {
    let (_dir, path) = file_db();
    let journal = Journal::default();
    let registry = Registry::new(vec![
        slow("A", &journal, Duration::from_millis(30)),
        slow("B", &journal, Duration::from_millis(30)),
        slow("C", &journal, Duration::from_millis(30)),
    ])
    .unwrap();
    db::open(&path).unwrap();

    let options = RunnerOptions {
        lock_timeout: Duration::from_secs(20),
        ..fast_options()
    };

    let results: Vec<usize> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let registry = &registry;
                let options = options.clone();
                let path = path.clone();
                s.spawn(move || {
                    let mut conn = db::open(&path).unwrap();
                    Runner::new(registry, options)
                        .unwrap()
                        .up(&mut conn, None)
                        .unwrap()
                        .completed
                        .len()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().sum::<usize>(), 3);
    assert!(results.contains(&0), "the second run finds nothing pending");
    assert_eq!(journal.count("up:A"), 1);
    assert_eq!(journal.count("up:B"), 1);
    assert_eq!(journal.count("up:C"), 1);

    let conn = db::open(&path).unwrap();
    assert_eq!(ledger_ids(&conn), vec!["A", "B", "C"]);
}
