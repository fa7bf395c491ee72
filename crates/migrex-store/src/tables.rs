//! Storage table names
//!
//! The prefix comes from configuration and is spliced into SQL text, so it is
//! restricted to `[A-Za-z0-9_]*`.

use crate::errors::{invalid_prefix, Result};

const LEDGER_TABLE: &str = "schema_migrations";
const LOCK_TABLE: &str = "schema_migrations_lock";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    prefix: String,
    ledger: String,
    lock: String,
}

impl TableNames {
    /// Build table names for a prefix
    ///
    /// # Errors
    ///
    /// `ExErrorKind::Config` if the prefix contains characters other than
    /// ASCII letters, digits and `_`.
    pub fn with_prefix(prefix: &str) -> Result<Self> {
        if !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(invalid_prefix(prefix));
        }
        Ok(Self {
            prefix: prefix.to_string(),
            ledger: format!("{}{}", prefix, LEDGER_TABLE),
            lock: format!("{}{}", prefix, LOCK_TABLE),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn ledger(&self) -> &str {
        &self.ledger
    }

    pub fn lock(&self) -> &str {
        &self.lock
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            ledger: LEDGER_TABLE.to_string(),
            lock: LOCK_TABLE.to_string(),
        }
    }
}
