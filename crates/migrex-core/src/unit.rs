//! Migration units
//!
//! A unit is `{identifier, up, down?}`. Steps receive an explicit
//! `MigrationContext`; there is no ambient database handle.

use crate::checksum::unit_checksum;
use crate::identifier::MigrationId;
use migrex_core_types::RunId;
use rusqlite::Connection;
use std::fmt;

/// Placeholder replaced by the configured table prefix in SQL units
pub const PREFIX_PLACEHOLDER: &str = "{prefix}";

/// Execution surface handed to every up/down step
pub struct MigrationContext<'a> {
    conn: &'a Connection,
    table_prefix: &'a str,
    run_id: &'a RunId,
}

impl<'a> MigrationContext<'a> {
    pub fn new(conn: &'a Connection, table_prefix: &'a str, run_id: &'a RunId) -> Self {
        Self {
            conn,
            table_prefix,
            run_id,
        }
    }

    /// Connection (or open transaction) the step must run against
    pub fn conn(&self) -> &Connection {
        self.conn
    }

    pub fn table_prefix(&self) -> &str {
        self.table_prefix
    }

    /// Prefixed table name
    pub fn table(&self, name: &str) -> String {
        format!("{}{}", self.table_prefix, name)
    }

    pub fn run_id(&self) -> &RunId {
        self.run_id
    }

    /// Execute a batch of SQL, substituting `{prefix}` with the table prefix
    pub fn execute_batch(&self, sql: &str) -> anyhow::Result<()> {
        let sql = sql.replace(PREFIX_PLACEHOLDER, self.table_prefix);
        self.conn.execute_batch(&sql)?;
        Ok(())
    }
}

/// One direction of a migration unit
pub trait Step: Send + Sync {
    fn run(&self, ctx: &MigrationContext<'_>) -> anyhow::Result<()>;
}

impl<F> Step for F
where
    F: Fn(&MigrationContext<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn run(&self, ctx: &MigrationContext<'_>) -> anyhow::Result<()> {
        self(ctx)
    }
}

struct SqlStep(String);

impl Step for SqlStep {
    fn run(&self, ctx: &MigrationContext<'_>) -> anyhow::Result<()> {
        ctx.execute_batch(&self.0)
    }
}

/// Outcome of invoking a unit's revert
#[derive(Debug)]
pub enum RevertOutcome {
    Reverted,
    Failed(anyhow::Error),
    /// The unit has no down step
    Unsupported,
}

/// A named, ordered unit of schema or data change
pub struct MigrationUnit {
    id: MigrationId,
    description: Option<String>,
    up: Box<dyn Step>,
    down: Option<Box<dyn Step>>,
    checksum: Option<String>,
    transactional: bool,
}

impl MigrationUnit {
    /// Create an irreversible unit from an up step
    ///
    /// The identifier is validated when the unit is added to a `Registry`.
    pub fn new(id: impl Into<String>, up: impl Step + 'static) -> Self {
        Self {
            id: MigrationId::unchecked(id.into()),
            description: None,
            up: Box::new(up),
            down: None,
            checksum: None,
            transactional: true,
        }
    }

    /// Create a unit from SQL text, with an optional revert script
    ///
    /// `{prefix}` in either script is replaced with the configured table
    /// prefix at run time. The unit carries a checksum of both scripts.
    pub fn sql(id: impl Into<String>, up_sql: &str, down_sql: Option<&str>) -> Self {
        let checksum = unit_checksum(up_sql, down_sql);
        let mut unit = Self::new(id, SqlStep(up_sql.to_string()));
        if let Some(down) = down_sql {
            unit.down = Some(Box::new(SqlStep(down.to_string())));
        }
        unit.checksum = Some(checksum);
        unit
    }

    /// Attach a down step, making the unit reversible
    pub fn with_down(mut self, down: impl Step + 'static) -> Self {
        self.down = Some(Box::new(down));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Run this unit outside a transaction (for statements such as VACUUM)
    pub fn without_transaction(mut self) -> Self {
        self.transactional = false;
        self
    }

    pub fn id(&self) -> &MigrationId {
        &self.id
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    /// Invoke the up step
    pub fn apply(&self, ctx: &MigrationContext<'_>) -> anyhow::Result<()> {
        self.up.run(ctx)
    }

    /// Invoke the down step, or report that there is none
    pub fn revert(&self, ctx: &MigrationContext<'_>) -> RevertOutcome {
        match &self.down {
            None => RevertOutcome::Unsupported,
            Some(down) => match down.run(ctx) {
                Ok(()) => RevertOutcome::Reverted,
                Err(e) => RevertOutcome::Failed(e),
            },
        }
    }
}

impl fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationUnit")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("reversible", &self.is_reversible())
            .field("transactional", &self.transactional)
            .field("checksum", &self.checksum)
            .finish()
    }
}
