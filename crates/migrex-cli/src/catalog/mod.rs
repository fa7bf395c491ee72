//! Migrations compiled into the `migrate` binary
//!
//! Scaffold a new unit with `migrate create <name>`, then add its module and
//! its `unit()` constructor below. Order in this list does not matter; the
//! registry sorts by identifier.

use migrex_core::{MigrationUnit, Registry};

mod m20240105_090000_create_settings;
mod m20240212_141500_add_settings_updated_at;
mod m20240320_080000_create_page_cache;
mod m20240402_103000_purge_stale_page_cache;

pub fn units() -> Vec<MigrationUnit> {
    vec![
        m20240105_090000_create_settings::unit(),
        m20240212_141500_add_settings_updated_at::unit(),
        m20240320_080000_create_page_cache::unit(),
        m20240402_103000_purge_stale_page_cache::unit(),
    ]
}

/// # Errors
///
/// `MigrexError::DuplicateIdentifier` or `InvalidIdentifier` if the catalog
/// is malformed.
pub fn registry() -> migrex_core::Result<Registry> {
    Registry::new(units())
}
