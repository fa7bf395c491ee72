use migrex_core::MigrationUnit;

pub fn unit() -> MigrationUnit {
    MigrationUnit::sql(
        "20240212_141500_add_settings_updated_at",
        "ALTER TABLE {prefix}settings ADD COLUMN updated_at INTEGER;",
        Some("ALTER TABLE {prefix}settings DROP COLUMN updated_at;"),
    )
    .with_description("Track when a setting last changed (unix ms)")
}
