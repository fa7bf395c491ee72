//! migrex CLI
//!
//! The `migrate` binary: applies, reverts and inspects the migrations
//! compiled into the catalog.
//!
//! Exit codes: 0 success, 1 execution failure, 2 lock contention,
//! 3 usage or configuration error.

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use migrex_core::errors::{ExError, ExErrorKind};
use migrex_core::logging_facility;

mod catalog;
mod commands;
mod config;

const EXIT_FAILURE: i32 = 1;
const EXIT_LOCK_CONTENTION: i32 = 2;
const EXIT_USAGE: i32 = 3;

#[derive(Debug, Parser)]
#[command(name = "migrate", version)]
#[command(about = "migrex - ordered, locked schema migrations for SQLite", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: config::ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply pending migrations in identifier order
    Up(commands::migrate::UpArgs),
    /// Revert the most recently applied migrations
    Down(commands::migrate::DownArgs),
    /// List applied migrations, oldest first
    History(commands::migrate::HistoryArgs),
    /// Show applied and pending counts and the run lock holder
    Status,
    /// Scaffold a new migration unit
    Create(commands::create::CreateArgs),
    /// Force-release the run lock after a crashed run
    Unlock,
}

fn main() {
    dotenvy::dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => {
                let _ = e.print();
                std::process::exit(EXIT_USAGE);
            }
        },
    };

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        if !e.completed().is_empty() {
            eprintln!("Completed before the failure: {}", e.completed().join(", "));
        }
        std::process::exit(exit_code(&e));
    }
}

fn run(cli: Cli) -> Result<(), ExError> {
    let config = config::MigrexConfig::resolve(&cli.config)?;
    logging_facility::init(config.log_format.profile());

    match cli.command {
        Commands::Up(args) => commands::migrate::execute_up(args, &config),
        Commands::Down(args) => commands::migrate::execute_down(args, &config),
        Commands::History(args) => commands::migrate::execute_history(args, &config),
        Commands::Status => commands::migrate::execute_status(&config),
        Commands::Create(args) => commands::create::execute(args),
        Commands::Unlock => commands::migrate::execute_unlock(&config),
    }
}

fn exit_code(err: &ExError) -> i32 {
    match err.kind() {
        ExErrorKind::LockHeld => EXIT_LOCK_CONTENTION,
        ExErrorKind::InvalidInput
        | ExErrorKind::InvalidIdentifier
        | ExErrorKind::Config
        | ExErrorKind::UnknownTarget => EXIT_USAGE,
        _ => EXIT_FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&ExError::new(ExErrorKind::LockHeld)), 2);
        assert_eq!(exit_code(&ExError::new(ExErrorKind::Config)), 3);
        assert_eq!(exit_code(&ExError::new(ExErrorKind::UnknownTarget)), 3);
        assert_eq!(
            exit_code(&ExError::new(ExErrorKind::UnitExecutionFailure)),
            1
        );
        assert_eq!(exit_code(&ExError::new(ExErrorKind::LockLost)), 1);
        assert_eq!(exit_code(&ExError::new(ExErrorKind::Irreversible)), 1);
    }

    #[test]
    fn test_step_must_be_positive() {
        let err = Cli::try_parse_from(["migrate", "down", "--step", "0"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);

        let cli = Cli::try_parse_from(["migrate", "down"]).unwrap();
        assert!(matches!(cli.command, Commands::Down(args) if args.step == 1));
    }

    #[test]
    fn test_global_flags_follow_the_subcommand() {
        let cli =
            Cli::try_parse_from(["migrate", "status", "--db", "x.db", "--table-prefix", "app_"])
                .unwrap();
        assert_eq!(cli.config.database.as_deref(), Some(std::path::Path::new("x.db")));
        assert_eq!(cli.config.table_prefix.as_deref(), Some("app_"));
    }
}
