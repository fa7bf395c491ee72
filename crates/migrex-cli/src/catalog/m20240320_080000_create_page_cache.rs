use migrex_core::MigrationUnit;

pub fn unit() -> MigrationUnit {
    MigrationUnit::sql(
        "20240320_080000_create_page_cache",
        "CREATE TABLE {prefix}page_cache (
            url        TEXT PRIMARY KEY,
            body       BLOB NOT NULL,
            fetched_at INTEGER NOT NULL
        );
        CREATE INDEX {prefix}idx_page_cache_fetched_at ON {prefix}page_cache(fetched_at);",
        Some(
            "DROP INDEX {prefix}idx_page_cache_fetched_at;
            DROP TABLE {prefix}page_cache;",
        ),
    )
    .with_description("Cache of fetched pages keyed by URL")
}
