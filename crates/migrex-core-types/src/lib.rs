//! Core types shared across migrex facilities
//!
//! This crate provides foundational types used by both error handling
//! and logging facilities:
//!
//! - **Correlation types**: RunId, used as the run lock holder identity
//! - **Schema constants**: Canonical event names

pub mod correlation;
pub mod schema;

pub use correlation::RunId;
