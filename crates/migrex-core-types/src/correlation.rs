//! Correlation types for run tracking
//!
//! A `RunId` identifies one Runner invocation. It is stamped on every log
//! event emitted during the run and doubles as the holder identity written
//! into the run lock.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a single migration run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// Generate a new random RunId using UUIDv7
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Create from an existing string (for deserialization)
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Holder identity recorded in the run lock: `<run id>@pid<process id>`
    pub fn holder(&self) -> String {
        format!("{}@pid{}", self.0, std::process::id())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
