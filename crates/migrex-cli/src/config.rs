//! Configuration for the `migrate` binary
//!
//! Resolved in layers, lowest first: built-in defaults, a TOML file
//! (`--config`, or `migrex.toml` in the working directory when present),
//! then environment variables and command-line flags. The last two arrive
//! together through clap's `env` support, so a flag beats its variable.

use clap::{Args, ValueEnum};
use migrex_core::errors::{ExError, ExErrorKind};
use migrex_core::logging_facility::Profile;
use migrex_engine::RunnerOptions;
use migrex_store::{ScopeMode, TableNames};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file picked up from the working directory when `--config` is absent
pub const DEFAULT_CONFIG_FILE: &str = "migrex.toml";

const DEFAULT_DATABASE: &str = ".migrex/migrex.db";

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    pub fn profile(self) -> Profile {
        match self {
            LogFormat::Pretty => Profile::Development,
            LogFormat::Json => Profile::Production,
        }
    }
}

/// Resolved settings for one invocation
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrexConfig {
    pub database: PathBuf,
    pub table_prefix: String,
    pub lock_timeout_secs: u64,
    pub lock_lease_secs: u64,
    /// Run each unit inside its own transaction
    pub transactional: bool,
    pub log_format: LogFormat,
}

impl Default for MigrexConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from(DEFAULT_DATABASE),
            table_prefix: String::new(),
            lock_timeout_secs: 10,
            lock_lease_secs: 300,
            transactional: true,
            log_format: LogFormat::Pretty,
        }
    }
}

/// Flags shared by every subcommand, each backed by a `MIGREX_*` variable
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Path to a TOML config file
    #[arg(long, global = true, env = "MIGREX_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long = "db", global = true, env = "MIGREX_DATABASE", value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Prefix for the ledger and lock tables ([A-Za-z0-9_]*)
    #[arg(long, global = true, env = "MIGREX_TABLE_PREFIX")]
    pub table_prefix: Option<String>,

    /// Seconds to wait for a held run lock
    #[arg(
        long = "lock-timeout",
        global = true,
        env = "MIGREX_LOCK_TIMEOUT_SECS",
        value_name = "SECS"
    )]
    pub lock_timeout_secs: Option<u64>,

    /// Lease length in seconds, renewed throughout the run
    #[arg(
        long = "lock-lease",
        global = true,
        env = "MIGREX_LOCK_LEASE_SECS",
        value_name = "SECS"
    )]
    pub lock_lease_secs: Option<u64>,

    /// Run every unit in auto-commit mode instead of a transaction
    #[arg(long, global = true, env = "MIGREX_NO_TRANSACTION")]
    pub no_transaction: bool,

    #[arg(long, global = true, env = "MIGREX_LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,
}

impl MigrexConfig {
    /// Resolve the full configuration for an invocation
    ///
    /// # Errors
    ///
    /// `ExErrorKind::Config` if the file cannot be read or parsed, or the
    /// merged result is invalid.
    pub fn resolve(args: &ConfigArgs) -> Result<Self, ExError> {
        let mut config = Self::load(args.config.as_deref())?;
        config.apply_overrides(args);
        config.validate()?;
        Ok(config)
    }

    /// Load the file layer
    ///
    /// An explicit path must exist; without one, `migrex.toml` is read if it
    /// is present and defaults are used otherwise.
    ///
    /// # Errors
    ///
    /// `ExErrorKind::Config` if the file is missing, unreadable or invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ExError> {
        let path = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(config_error(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                path
            }
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(path).map_err(|e| {
            config_error(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content).map_err(|e| {
            let message = format!("{}: {}", path.display(), e.message());
            e.with_message(message)
        })?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    ///
    /// `ExErrorKind::Config` on malformed TOML, unknown keys or invalid values.
    pub fn from_toml_str(content: &str) -> Result<Self, ExError> {
        let config: Self = toml::from_str(content).map_err(|e| config_error(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay flags and environment variables
    pub fn apply_overrides(&mut self, args: &ConfigArgs) {
        if let Some(database) = &args.database {
            self.database = database.clone();
        }
        if let Some(prefix) = &args.table_prefix {
            self.table_prefix = prefix.clone();
        }
        if let Some(secs) = args.lock_timeout_secs {
            self.lock_timeout_secs = secs;
        }
        if let Some(secs) = args.lock_lease_secs {
            self.lock_lease_secs = secs;
        }
        if args.no_transaction {
            self.transactional = false;
        }
        if let Some(format) = args.log_format {
            self.log_format = format;
        }
    }

    fn validate(&self) -> Result<(), ExError> {
        if self.database.as_os_str().is_empty() {
            return Err(config_error("Database path cannot be empty"));
        }
        if self.lock_lease_secs == 0 {
            return Err(config_error("Lock lease must be at least one second"));
        }
        TableNames::with_prefix(&self.table_prefix)?;
        Ok(())
    }

    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            table_prefix: self.table_prefix.clone(),
            lock_timeout: Duration::from_secs(self.lock_timeout_secs),
            lock_lease: Duration::from_secs(self.lock_lease_secs),
            scope_mode: if self.transactional {
                ScopeMode::Transactional
            } else {
                ScopeMode::AutoCommit
            },
            ..RunnerOptions::default()
        }
    }
}

fn config_error(message: impl Into<String>) -> ExError {
    ExError::new(ExErrorKind::Config)
        .with_op("load_config")
        .with_message(message)
}
