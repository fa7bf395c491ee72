//! Scaffold a new migration unit

use chrono::Utc;
use clap::Args;
use migrex_core::errors::{ExError, ExErrorKind};
use migrex_core::MigrationId;
use migrex_store::errors::io_error;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Where the built-in catalog lives, relative to the workspace root
pub const DEFAULT_CATALOG_DIR: &str = "crates/migrex-cli/src/catalog";

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Human-readable name; slugified into the identifier
    pub name: String,

    /// Directory to write the unit file into
    #[arg(long, default_value = DEFAULT_CATALOG_DIR)]
    pub dir: PathBuf,
}

pub fn execute(args: CreateArgs) -> Result<(), ExError> {
    let id = MigrationId::generate(&args.name, Utc::now())?;
    let path = write_skeleton(&args.dir, &id)?;

    let module = id.module_name();
    println!("Created {}", path.display());
    println!("Register it in the catalog:");
    println!("  mod {};", module);
    println!("  {}::unit(),", module);
    Ok(())
}

/// Write `m<id>.rs` into `dir`, refusing to overwrite an existing file
fn write_skeleton(dir: &Path, id: &MigrationId) -> Result<PathBuf, ExError> {
    std::fs::create_dir_all(dir).map_err(|e| io_error("create_unit_dir", e))?;
    let path = dir.join(format!("{}.rs", id.module_name()));

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => ExError::new(ExErrorKind::InvalidInput)
                .with_op("create")
                .with_migration_id(id.as_str())
                .with_message(format!("{} already exists", path.display())),
            _ => io_error("write_unit_file", e),
        })?;
    file.write_all(render_skeleton(id).as_bytes())
        .map_err(|e| io_error("write_unit_file", e))?;

    tracing::info!(migration_id = %id, path = %path.display(), "Created migration unit");
    Ok(path)
}

fn render_skeleton(id: &MigrationId) -> String {
    format!(
        r#"use migrex_core::{{MigrationContext, MigrationUnit}};

// Irreversible until a down step is written: add `.with_down(down)` and a
// `down` function that undoes `up`.
pub fn unit() -> MigrationUnit {{
    MigrationUnit::new("{id}", up).with_description("{slug}")
}}

fn up(ctx: &MigrationContext<'_>) -> anyhow::Result<()> {{
    ctx.execute_batch("")
}}
"#,
        id = id,
        slug = id.slug().replace('_', " "),
    )
}
