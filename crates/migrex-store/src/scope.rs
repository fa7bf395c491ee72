//! Per-unit execution scopes
//!
//! A unit's effects and its ledger write share one scope. In transactional
//! mode they commit or roll back together; dropping an uncommitted scope
//! rolls back. In auto-commit mode every statement is durable as soon as it
//! runs, so a failed unit may leave partial effects behind.

use crate::errors::{persistence, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};

/// How a unit's statements are grouped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeMode {
    #[default]
    Transactional,
    AutoCommit,
}

impl ScopeMode {
    /// Effective mode for a unit; units that opt out of transactions always
    /// run in auto-commit mode
    pub fn for_unit(self, unit_is_transactional: bool) -> Self {
        if unit_is_transactional {
            self
        } else {
            ScopeMode::AutoCommit
        }
    }
}

enum Inner<'c> {
    Tx(Transaction<'c>),
    Direct(&'c Connection),
}

/// Scope a single unit runs in
pub struct UnitScope<'c> {
    inner: Inner<'c>,
}

impl<'c> UnitScope<'c> {
    /// Open a scope on `conn`
    ///
    /// Transactional scopes begin IMMEDIATE so the write lock is taken up
    /// front rather than at the unit's first write.
    pub fn open(conn: &'c mut Connection, mode: ScopeMode) -> Result<Self> {
        let inner = match mode {
            ScopeMode::Transactional => Inner::Tx(
                conn.transaction_with_behavior(TransactionBehavior::Immediate)
                    .map_err(|e| persistence("scope_open", e))?,
            ),
            ScopeMode::AutoCommit => Inner::Direct(conn),
        };
        Ok(Self { inner })
    }

    /// Connection the unit and its ledger write must use
    pub fn conn(&self) -> &Connection {
        match &self.inner {
            Inner::Tx(tx) => &**tx,
            Inner::Direct(conn) => conn,
        }
    }

    pub fn mode(&self) -> ScopeMode {
        match self.inner {
            Inner::Tx(_) => ScopeMode::Transactional,
            Inner::Direct(_) => ScopeMode::AutoCommit,
        }
    }

    /// Make the unit's effects durable
    pub fn commit(self) -> Result<()> {
        match self.inner {
            Inner::Tx(tx) => tx.commit().map_err(|e| persistence("scope_commit", e)),
            Inner::Direct(_) => Ok(()),
        }
    }

    /// Discard the unit's effects
    ///
    /// Returns `false` in auto-commit mode, where nothing can be undone.
    pub fn rollback(self) -> Result<bool> {
        match self.inner {
            Inner::Tx(tx) => {
                tx.rollback().map_err(|e| persistence("scope_rollback", e))?;
                Ok(true)
            }
            Inner::Direct(_) => Ok(false),
        }
    }
}
