//! Command orchestration layer.
//!
//! One entry point per user-facing command, dispatched onto a `Runner`.

pub mod engine_command;

pub use engine_command::{apply_engine_command, EngineCommand, EngineCommandResult};
