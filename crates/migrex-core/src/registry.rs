//! Migration registry
//!
//! The registry is assembled from a static list of unit constructors compiled
//! into the binary. Construction validates identifiers, rejects duplicates and
//! sorts units ascending by identifier; afterwards it is read-only.

use crate::errors::{MigrexError, Result};
use crate::identifier::MigrationId;
use crate::unit::MigrationUnit;

/// Ordered, duplicate-free set of migration units
#[derive(Debug, Default)]
pub struct Registry {
    units: Vec<MigrationUnit>,
}

impl Registry {
    /// Build a registry from units in any order
    ///
    /// # Errors
    ///
    /// - `MigrexError::InvalidIdentifier` if a unit's identifier is malformed
    /// - `MigrexError::DuplicateIdentifier` if two units share an identifier
    pub fn new(mut units: Vec<MigrationUnit>) -> Result<Self> {
        for unit in &units {
            unit.id().validate()?;
        }

        units.sort_by(|a, b| a.id().cmp(b.id()));

        if let Some(pair) = units.windows(2).find(|w| w[0].id() == w[1].id()) {
            return Err(MigrexError::DuplicateIdentifier {
                id: pair[0].id().to_string(),
            });
        }

        tracing::debug!(units = units.len(), "Built migration registry");

        Ok(Self { units })
    }

    /// All units, ascending by identifier
    pub fn list_all(&self) -> &[MigrationUnit] {
        &self.units
    }

    /// All units, failing if there are none
    ///
    /// # Errors
    ///
    /// `MigrexError::EmptyRegistry` if no unit is registered.
    pub fn require_non_empty(&self) -> Result<&[MigrationUnit]> {
        if self.units.is_empty() {
            return Err(MigrexError::EmptyRegistry);
        }
        Ok(&self.units)
    }

    /// Look up a unit by identifier
    pub fn get(&self, id: &str) -> Option<&MigrationUnit> {
        self.units
            .binary_search_by(|u| u.id().as_str().cmp(id))
            .ok()
            .map(|idx| &self.units[idx])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Identifiers in application order
    pub fn ids(&self) -> impl Iterator<Item = &MigrationId> {
        self.units.iter().map(MigrationUnit::id)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
