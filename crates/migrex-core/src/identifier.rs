//! Migration identifiers
//!
//! An identifier is an opaque string whose byte-wise lexical order *is* the
//! application order. Identifiers produced by `generate` follow the
//! `YYYYMMDD_HHMMSS_slug` convention so that creation order and application
//! order coincide.

use crate::errors::{MigrexError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

/// Length of the `YYYYMMDD_HHMMSS` prefix
const TIMESTAMP_PREFIX_LEN: usize = 15;
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Globally unique, lexically sortable migration identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MigrationId(String);

impl MigrationId {
    /// Parse and validate an identifier
    ///
    /// Accepts non-empty strings of ASCII letters, digits, `_`, `-` and `.`.
    ///
    /// # Errors
    ///
    /// `MigrexError::InvalidIdentifier` if the string is empty or contains a
    /// character outside the allowed set.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        validate(&raw)?;
        Ok(Self(raw))
    }

    /// Wrap without validation; `Registry::new` validates before use.
    pub(crate) fn unchecked(raw: String) -> Self {
        Self(raw)
    }

    /// Allocate a fresh `YYYYMMDD_HHMMSS_slug` identifier for `name`
    ///
    /// # Errors
    ///
    /// `MigrexError::InvalidIdentifier` if `name` contains no ASCII
    /// alphanumeric character to build a slug from.
    pub fn generate(name: &str, at: DateTime<Utc>) -> Result<Self> {
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(MigrexError::InvalidIdentifier {
                id: name.to_string(),
                reason: "name must contain at least one ASCII letter or digit".to_string(),
            });
        }
        Ok(Self(format!("{}_{}", at.format(TIMESTAMP_FORMAT), slug)))
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Re-run validation (used for identifiers built with `unchecked`)
    pub(crate) fn validate(&self) -> Result<()> {
        validate(&self.0)
    }

    /// Creation time encoded in the prefix, if the identifier follows the convention
    pub fn created_at(&self) -> Option<NaiveDateTime> {
        let prefix = self.0.get(..TIMESTAMP_PREFIX_LEN)?;
        NaiveDateTime::parse_from_str(prefix, TIMESTAMP_FORMAT).ok()
    }

    /// Human-readable part of the identifier
    pub fn slug(&self) -> &str {
        if self.created_at().is_some() {
            self.0[TIMESTAMP_PREFIX_LEN..].trim_start_matches('_')
        } else {
            &self.0
        }
    }

    /// Rust module name for a unit file holding this migration (`m<id>`)
    pub fn module_name(&self) -> String {
        let body: String = self
            .0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        format!("m{}", body)
    }
}

fn validate(raw: &str) -> Result<()> {
    if raw.is_empty() {
        return Err(MigrexError::InvalidIdentifier {
            id: raw.to_string(),
            reason: "identifier must not be empty".to_string(),
        });
    }
    if let Some(bad) = raw
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(MigrexError::InvalidIdentifier {
            id: raw.to_string(),
            reason: format!("character {:?} is not allowed", bad),
        });
    }
    Ok(())
}

/// Lowercase, map runs of non-alphanumerics to a single `_`, trim edges
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    slug
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MigrationId {
    type Err = MigrexError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MigrationId {
    type Error = MigrexError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<MigrationId> for String {
    fn from(id: MigrationId) -> Self {
        id.0
    }
}

impl Borrow<str> for MigrationId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for MigrationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
