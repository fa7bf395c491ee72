use migrex_core::MigrationUnit;

pub fn unit() -> MigrationUnit {
    MigrationUnit::sql(
        "20240105_090000_create_settings",
        "CREATE TABLE {prefix}settings (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
        Some("DROP TABLE {prefix}settings;"),
    )
    .with_description("Key/value application settings")
}
