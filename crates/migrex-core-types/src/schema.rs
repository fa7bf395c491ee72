//! Canonical event names for structured logging
//!
//! The `log_op_*` macros stamp every operation event with one of these.

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";
