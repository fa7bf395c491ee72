//! migrex Core - Migration units, registry and planning
//!
//! This crate provides the database-agnostic kernel of the migration engine:
//! - Migration identifiers with their lexical ordering contract
//! - Migration units (apply step, optional revert step) and their context
//! - The static registry imposing a total order over units
//! - Pure planning of pending (up) and revert (down) sequences
//! - The error facility and the structured logging facility

pub mod checksum;
pub mod errors;
pub mod identifier;
pub mod logging_facility;
pub mod plan;
pub mod registry;
pub mod unit;

// Re-export commonly used types
pub use errors::{ExError, ExErrorKind, MigrexError, Result};
pub use identifier::MigrationId;
pub use plan::{plan_down, plan_up, DownPlan, DownStep, UpPlan};
pub use registry::Registry;
pub use unit::{MigrationContext, MigrationUnit, RevertOutcome, Step};
