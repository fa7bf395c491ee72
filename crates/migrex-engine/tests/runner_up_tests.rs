// Test suite for `migrate up`
// Ordering, idempotency, failure policy, targets and scopes

mod common;

use common::*;
use migrex_core::{ExErrorKind, MigrationId, MigrationUnit, Registry};
use migrex_engine::{RunState, Runner, RunnerOptions};
use migrex_store::{db, ScopeMode};

#[test]
fn test_up_applies_everything_in_identifier_order() {
    // Given: units registered out of order and an empty ledger
    let journal = Journal::default();
    let registry = Registry::new(vec![
        reversible("C_drop_col", &journal),
        reversible("A_add_col", &journal),
        reversible("B_add_col", &journal),
    ])
    .unwrap();
    let mut conn = db::open_in_memory().unwrap();
    let mut runner = Runner::new(&registry, fast_options()).unwrap();

    // When: up runs
    let report = runner.up(&mut conn, None).unwrap();

    // Then: all three apply, ascending, and the ledger matches
    let expected = vec!["A_add_col", "B_add_col", "C_drop_col"];
    assert_eq!(strs(report.completed_ids()), expected);
    assert_eq!(ledger_ids(&conn), expected);
    assert_eq!(
        journal.entries(),
        vec!["up:A_add_col", "up:B_add_col", "up:C_drop_col"]
    );
    assert!(report.orphans.is_empty());
}

#[test]
fn test_up_twice_applies_nothing_the_second_time() {
    let journal = Journal::default();
    let registry = Registry::new(vec![
        reversible("A", &journal),
        reversible("B", &journal),
    ])
    .unwrap();
    let mut conn = db::open_in_memory().unwrap();
    let mut runner = Runner::new(&registry, fast_options()).unwrap();

    runner.up(&mut conn, None).unwrap();
    let second = runner.up(&mut conn, None).unwrap();

    assert!(second.completed.is_empty());
    assert_eq!(journal.count("up:A"), 1);
    assert_eq!(journal.count("up:B"), 1);
    assert_eq!(ledger_ids(&conn), vec!["A", "B"]);
}

#[test]
fn test_failing_unit_stops_the_run_and_keeps_the_prefix() {
    // Given: [A, B] where B fails
    let journal = Journal::default();
    let registry = Registry::new(vec![
        reversible("A", &journal),
        failing("B", &journal),
    ])
    .unwrap();
    let mut conn = db::open_in_memory().unwrap();
    let mut runner = Runner::new(&registry, fast_options()).unwrap();

    // When: up runs
    let err = runner.up(&mut conn, None).unwrap_err();

    // Then: the failure names B, carries the cause and lists A as completed
    assert_eq!(err.kind(), ExErrorKind::UnitExecutionFailure);
    assert_eq!(err.migration_id(), Some("B"));
    assert!(err.message().contains("hit a constraint"));
    assert_eq!(err.completed(), ["A".to_string()]);
    assert!(err.run_id().is_some());

    // And: the ledger holds exactly {A}; B's effects were rolled back
    assert_eq!(ledger_ids(&conn), vec!["A"]);
    assert!(table_exists(&conn, "t_A"));
    assert!(!table_exists(&conn, "t_B"));
}

#[test]
fn test_kth_failure_records_exactly_k_minus_one() {
    let journal = Journal::default();
    let registry = Registry::new(vec![
        reversible("U1", &journal),
        reversible("U2", &journal),
        failing("U3", &journal),
        reversible("U4", &journal),
        reversible("U5", &journal),
    ])
    .unwrap();
    let mut conn = db::open_in_memory().unwrap();
    let mut runner = Runner::new(&registry, fast_options()).unwrap();

    let err = runner.up(&mut conn, None).unwrap_err();

    assert_eq!(err.migration_id(), Some("U3"));
    assert_eq!(ledger_ids(&conn), vec!["U1", "U2"]);
    assert_eq!(journal.count("up:U4"), 0, "units after the failure never run");
    assert_eq!(journal.count("up:U5"), 0);
}

#[test]
fn test_rerun_after_fix_resumes_at_the_failed_unit() {
    let journal = Journal::default();
    let mut conn = db::open_in_memory().unwrap();

    let broken = Registry::new(vec![
        reversible("A", &journal),
        failing("B", &journal),
    ])
    .unwrap();
    Runner::new(&broken, fast_options())
        .unwrap()
        .up(&mut conn, None)
        .unwrap_err();

    let fixed = Registry::new(vec![
        reversible("A", &journal),
        reversible("B", &journal),
    ])
    .unwrap();
    let report = Runner::new(&fixed, fast_options())
        .unwrap()
        .up(&mut conn, None)
        .unwrap();

    assert_eq!(strs(report.completed_ids()), vec!["B"]);
    assert_eq!(journal.count("up:A"), 1);
    assert_eq!(ledger_ids(&conn), vec!["A", "B"]);
}

#[test]
fn test_target_applies_an_inclusive_prefix() {
    let journal = Journal::default();
    let registry = Registry::new(vec![
        reversible("A", &journal),
        reversible("B", &journal),
        reversible("C", &journal),
        reversible("D", &journal),
    ])
    .unwrap();
    let mut conn = db::open_in_memory().unwrap();
    let mut runner = Runner::new(&registry, fast_options()).unwrap();

    let target = MigrationId::parse("B").unwrap();
    runner.up(&mut conn, Some(&target)).unwrap();
    assert_eq!(ledger_ids(&conn), vec!["A", "B"]);

    // a target that is already applied is a successful no-op
    let target = MigrationId::parse("A").unwrap();
    let report = runner.up(&mut conn, Some(&target)).unwrap();
    assert!(report.completed.is_empty());

    runner.up(&mut conn, None).unwrap();
    assert_eq!(ledger_ids(&conn), vec!["A", "B", "C", "D"]);
}

#[test]
fn test_unknown_target_is_rejected_without_changes() {
    let journal = Journal::default();
    let registry = Registry::new(vec![reversible("A", &journal)]).unwrap();
    let mut conn = db::open_in_memory().unwrap();
    let mut runner = Runner::new(&registry, fast_options()).unwrap();

    let target = MigrationId::parse("Z").unwrap();
    let err = runner.up(&mut conn, Some(&target)).unwrap_err();

    assert_eq!(err.kind(), ExErrorKind::UnknownTarget);
    assert_eq!(err.migration_id(), Some("Z"));
    assert!(ledger_ids(&conn).is_empty());
    assert!(journal.entries().is_empty());
    assert_eq!(
        runner.transitions(),
        [
            RunState::Idle,
            RunState::Locking,
            RunState::Planning,
            RunState::Failed,
            RunState::Idle
        ]
    );
}

#[test]
fn test_orphans_are_reported_but_not_fatal() {
    let journal = Journal::default();
    let mut conn = db::open_in_memory().unwrap();

    let old = Registry::new(vec![
        reversible("A", &journal),
        reversible("B", &journal),
    ])
    .unwrap();
    Runner::new(&old, fast_options())
        .unwrap()
        .up(&mut conn, None)
        .unwrap();

    let new = Registry::new(vec![
        reversible("B", &journal),
        reversible("C", &journal),
    ])
    .unwrap();
    let progress = RecordingProgress::default();
    let report = Runner::new(&new, fast_options())
        .unwrap()
        .with_progress(&progress)
        .up(&mut conn, None)
        .unwrap();

    assert_eq!(strs(report.orphans.iter().collect()), vec!["A"]);
    assert_eq!(strs(report.completed_ids()), vec!["C"]);
    assert!(progress.lines().contains(&"orphan A".to_string()));
}

#[test]
fn test_failed_run_transitions() {
    let journal = Journal::default();
    let registry = Registry::new(vec![failing("A", &journal)]).unwrap();
    let mut conn = db::open_in_memory().unwrap();
    let mut runner = Runner::new(&registry, fast_options()).unwrap();

    runner.up(&mut conn, None).unwrap_err();

    assert_eq!(
        runner.transitions(),
        [
            RunState::Idle,
            RunState::Locking,
            RunState::Planning,
            RunState::Executing,
            RunState::Failed,
            RunState::Idle
        ]
    );
}

#[test]
fn test_auto_commit_mode_leaves_partial_effects() {
    let journal = Journal::default();
    let registry = Registry::new(vec![failing("A", &journal)]).unwrap();
    let mut conn = db::open_in_memory().unwrap();
    let options = RunnerOptions {
        scope_mode: ScopeMode::AutoCommit,
        ..fast_options()
    };
    let mut runner = Runner::new(&registry, options).unwrap();

    runner.up(&mut conn, None).unwrap_err();

    assert!(
        table_exists(&conn, "t_A"),
        "auto-commit cannot undo the statements that already ran"
    );
    assert!(ledger_ids(&conn).is_empty());
}

#[test]
fn test_unit_opting_out_of_transactions() {
    let journal = Journal::default();
    let registry = Registry::new(vec![
        reversible("A", &journal),
        failing("B", &journal).without_transaction(),
    ])
    .unwrap();
    let mut conn = db::open_in_memory().unwrap();
    let mut runner = Runner::new(&registry, fast_options()).unwrap();

    runner.up(&mut conn, None).unwrap_err();

    assert!(table_exists(&conn, "t_B"));
    assert_eq!(ledger_ids(&conn), vec!["A"]);
}

#[test]
fn test_sql_units_use_prefix_and_record_checksum() {
    let unit = MigrationUnit::sql(
        "20240101_000000_create_items",
        "CREATE TABLE {prefix}items (id INTEGER PRIMARY KEY)",
        Some("DROP TABLE {prefix}items"),
    );
    let checksum = unit.checksum().unwrap().to_string();
    let registry = Registry::new(vec![unit]).unwrap();
    let mut conn = db::open_in_memory().unwrap();
    let options = RunnerOptions {
        table_prefix: "app_".to_string(),
        ..fast_options()
    };
    let mut runner = Runner::new(&registry, options).unwrap();

    runner.up(&mut conn, None).unwrap();

    assert!(table_exists(&conn, "app_items"));
    assert!(table_exists(&conn, "app_schema_migrations"));
    assert!(!table_exists(&conn, "schema_migrations"));
    let stored: String = conn
        .query_row(
            "SELECT checksum FROM app_schema_migrations WHERE identifier = ?1",
            ["20240101_000000_create_items"],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(stored, checksum);
}

#[test]
fn test_empty_registry_is_a_successful_noop() {
    let registry = Registry::new(Vec::new()).unwrap();
    let mut conn = db::open_in_memory().unwrap();
    let mut runner = Runner::new(&registry, fast_options()).unwrap();

    let report = runner.up(&mut conn, None).unwrap();

    assert!(report.completed.is_empty());
    assert!(table_exists(&conn, "schema_migrations"));
}

#[test]
fn test_progress_sees_each_unit_in_order() {
    let journal = Journal::default();
    let registry = Registry::new(vec![
        reversible("A", &journal),
        failing("B", &journal),
    ])
    .unwrap();
    let mut conn = db::open_in_memory().unwrap();
    let progress = RecordingProgress::default();
    let mut runner = Runner::new(&registry, fast_options())
        .unwrap()
        .with_progress(&progress);

    runner.up(&mut conn, None).unwrap_err();

    assert_eq!(
        progress.lines(),
        vec![
            "plan up 2",
            "start up A",
            "ok up A",
            "start up B",
            "fail up B ERR_UNIT_EXECUTION_FAILURE"
        ]
    );
}
