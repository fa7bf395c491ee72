//! migrex Store - SQLite persistence for the migration engine
//!
//! Provides:
//! - Connection management
//! - The applied-history ledger table
//! - The lease-based run lock table
//! - Per-unit transactional scopes

pub mod db;
pub mod errors;
pub mod ledger;
pub mod lock;
pub mod scope;
pub mod tables;

// Re-export key types
pub use errors::Result;
pub use ledger::{Ledger, LedgerEntry};
pub use lock::{LeaseHeartbeat, LockInfo, LockToken, RunLock};
pub use scope::{ScopeMode, UnitScope};
pub use tables::TableNames;
