mod migrate;

pub use migrate::{MigrateAction, MigrateCommand};

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// quarry - ledger-backed SQL migrations
#[derive(Parser)]
#[command(name = "quarry")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Manage database migrations.
    Migrate(MigrateCommand),
}

/// How a command that ran to completion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Everything pending was applied, or nothing was pending.
    Success,
    /// A migration failed. Earlier migrations in the run were kept.
    MigrationFailed,
}

impl Outcome {
    pub fn code(&self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::MigrationFailed => 1,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<Outcome> {
        match self.command {
            Commands::Migrate(cmd) => cmd.execute(self.verbose).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::Environment;

    #[test]
    fn test_cli_parse_defaults() {
        let cli = Cli::try_parse_from(["quarry", "migrate"]).unwrap();
        let Commands::Migrate(cmd) = cli.command;
        assert!(cmd.action.is_none());
        assert_eq!(cmd.env, Environment::Development);
        assert_eq!(cmd.config, "quarry.toml");
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_parse_environment() {
        let cli = Cli::try_parse_from(["quarry", "migrate", "up", "--env", "production"]).unwrap();
        let Commands::Migrate(cmd) = cli.command;
        assert!(matches!(cmd.action, Some(MigrateAction::Up)));
        assert_eq!(cmd.env, Environment::Production);
    }

    #[test]
    fn test_cli_parse_status_with_overrides() {
        let cli = Cli::try_parse_from([
            "quarry",
            "-v",
            "migrate",
            "status",
            "-e",
            "test",
            "-c",
            "config/quarry.toml",
            "-m",
            "sql/migrations",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Commands::Migrate(cmd) = cli.command;
        assert!(matches!(cmd.action, Some(MigrateAction::Status)));
        assert_eq!(cmd.env, Environment::Test);
        assert_eq!(cmd.migrations_dir.as_deref(), Some("sql/migrations"));
    }

    #[test]
    fn test_cli_rejects_unknown_environment() {
        assert!(Cli::try_parse_from(["quarry", "migrate", "--env", "staging"]).is_err());
    }

    #[test]
    fn test_outcome_codes() {
        assert_eq!(Outcome::Success.code(), 0);
        assert_eq!(Outcome::MigrationFailed.code(), 1);
    }
}
