//! Data migration: deleted rows cannot be brought back, so there is no down step.

use chrono::{Duration, Utc};
use migrex_core::{MigrationContext, MigrationUnit};

const MAX_AGE_DAYS: i64 = 30;

pub fn unit() -> MigrationUnit {
    MigrationUnit::new("20240402_103000_purge_stale_page_cache", up)
        .with_description("Drop cached pages older than 30 days")
}

fn up(ctx: &MigrationContext<'_>) -> anyhow::Result<()> {
    let cutoff = (Utc::now() - Duration::days(MAX_AGE_DAYS)).timestamp_millis();
    let purged = ctx.conn().execute(
        &format!("DELETE FROM {} WHERE fetched_at < ?1", ctx.table("page_cache")),
        [cutoff],
    )?;
    tracing::info!(purged = purged as u64, run_id = %ctx.run_id(), "Purged stale cached pages");
    Ok(())
}
