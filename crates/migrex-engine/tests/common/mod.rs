use migrex_core::{MigrationContext, MigrationId, MigrationUnit};
use migrex_engine::{Direction, ProgressSink, RunnerOptions};
use rusqlite::Connection;
use std::cell::RefCell;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared record of which steps ran, in order
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

#[allow(dead_code)]
impl Journal {
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| e.as_str() == entry).count()
    }
}

/// Unit whose up creates table `t_<id>` and whose down drops it
#[allow(dead_code)]
pub fn reversible(id: &str, journal: &Journal) -> MigrationUnit {
    let down_journal = journal.clone();
    let down_id = id.to_string();
    irreversible(id, journal).with_down(move |ctx: &MigrationContext<'_>| -> anyhow::Result<()> {
        down_journal.push(format!("down:{}", down_id));
        ctx.conn()
            .execute_batch(&format!("DROP TABLE {}", ctx.table(&format!("t_{}", down_id))))?;
        Ok(())
    })
}

/// Unit whose up creates table `t_<id>` and which has no down step
#[allow(dead_code)]
pub fn irreversible(id: &str, journal: &Journal) -> MigrationUnit {
    let journal = journal.clone();
    let up_id = id.to_string();
    MigrationUnit::new(id, move |ctx: &MigrationContext<'_>| -> anyhow::Result<()> {
        journal.push(format!("up:{}", up_id));
        ctx.conn().execute_batch(&format!(
            "CREATE TABLE {} (x INTEGER)",
            ctx.table(&format!("t_{}", up_id))
        ))?;
        Ok(())
    })
}

/// Unit whose up creates its table and then fails
#[allow(dead_code)]
pub fn failing(id: &str, journal: &Journal) -> MigrationUnit {
    let journal = journal.clone();
    let up_id = id.to_string();
    MigrationUnit::new(id, move |ctx: &MigrationContext<'_>| -> anyhow::Result<()> {
        journal.push(format!("up:{}", up_id));
        ctx.conn().execute_batch(&format!(
            "CREATE TABLE {} (x INTEGER)",
            ctx.table(&format!("t_{}", up_id))
        ))?;
        anyhow::bail!("backfill for {} hit a constraint", up_id)
    })
}

/// Unit whose up sleeps before creating its table
#[allow(dead_code)]
pub fn slow(id: &str, journal: &Journal, delay: Duration) -> MigrationUnit {
    let journal = journal.clone();
    let up_id = id.to_string();
    MigrationUnit::new(id, move |ctx: &MigrationContext<'_>| -> anyhow::Result<()> {
        std::thread::sleep(delay);
        journal.push(format!("up:{}", up_id));
        ctx.conn().execute_batch(&format!(
            "CREATE TABLE {} (x INTEGER)",
            ctx.table(&format!("t_{}", up_id))
        ))?;
        Ok(())
    })
}

#[allow(dead_code)]
pub fn fast_options() -> RunnerOptions {
    RunnerOptions {
        lock_timeout: Duration::ZERO,
        poll_interval: Duration::from_millis(10),
        ..RunnerOptions::default()
    }
}

#[allow(dead_code)]
pub fn table_exists(conn: &Connection, name: &str) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get::<_, i64>(0),
    )
    .unwrap()
        == 1
}

/// Ledger identifiers, oldest first, read straight from the table
#[allow(dead_code)]
pub fn ledger_ids(conn: &Connection) -> Vec<String> {
    ledger_ids_in(conn, "schema_migrations")
}

#[allow(dead_code)]
pub fn ledger_ids_in(conn: &Connection, table: &str) -> Vec<String> {
    if !table_exists(conn, table) {
        return Vec::new();
    }
    let mut stmt = conn
        .prepare(&format!(
            "SELECT identifier FROM {} ORDER BY applied_at, rowid",
            table
        ))
        .unwrap();
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    ids
}

#[allow(dead_code)]
pub fn strs(ids: Vec<&MigrationId>) -> Vec<String> {
    ids.into_iter().map(|id| id.to_string()).collect()
}

/// Progress sink recording every callback as a line
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingProgress {
    lines: RefCell<Vec<String>>,
}

#[allow(dead_code)]
impl RecordingProgress {
    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn on_plan(&self, direction: Direction, ids: &[&MigrationId]) {
        self.lines
            .borrow_mut()
            .push(format!("plan {} {}", direction.as_str(), ids.len()));
    }

    fn on_unit_start(&self, direction: Direction, id: &MigrationId) {
        self.lines
            .borrow_mut()
            .push(format!("start {} {}", direction.as_str(), id));
    }

    fn on_unit_success(&self, direction: Direction, id: &MigrationId, _elapsed: Duration) {
        self.lines
            .borrow_mut()
            .push(format!("ok {} {}", direction.as_str(), id));
    }

    fn on_unit_failure(
        &self,
        direction: Direction,
        id: &MigrationId,
        err: &migrex_core::ExError,
    ) {
        self.lines
            .borrow_mut()
            .push(format!("fail {} {} {}", direction.as_str(), id, err.code()));
    }

    fn on_orphan(&self, id: &MigrationId) {
        self.lines.borrow_mut().push(format!("orphan {}", id));
    }
}
