//! Checksums for SQL-backed migration units
//!
//! Computes SHA256 checksums of migration SQL so that edits made after a unit
//! was applied can be detected.

use sha2::{Digest, Sha256};

/// Compute SHA256 checksum of a string
pub fn compute_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Checksum covering both directions of a SQL unit.
///
/// The down SQL is separated by a NUL byte so that moving text between the
/// two halves changes the digest.
pub fn unit_checksum(up_sql: &str, down_sql: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(up_sql.as_bytes());
    if let Some(down) = down_sql {
        hasher.update([0u8]);
        hasher.update(down.as_bytes());
    }
    hex::encode(hasher.finalize())
}
