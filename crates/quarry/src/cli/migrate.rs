use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use std::path::{Path, PathBuf};
use tracing::warn;

use quarry_core::config::{EnvironmentConfig, QuarryConfig};
use quarry_core::Environment;
use quarry_runtime::migrations::{
    EngineExecutor, MigrationLock, MigrationStatus, Orchestrator, PgLedger, RunReport,
};

use super::Outcome;

/// Manage database migrations.
#[derive(Parser)]
pub struct MigrateCommand {
    #[command(subcommand)]
    pub action: Option<MigrateAction>,

    /// Environment to migrate.
    #[arg(short, long, default_value = "development", global = true)]
    pub env: Environment,

    /// Configuration file path.
    #[arg(short, long, default_value = "quarry.toml", global = true)]
    pub config: String,

    /// Migrations directory path (overrides config).
    #[arg(short, long, global = true)]
    pub migrations_dir: Option<String>,

    /// Skip the advisory run lock.
    #[arg(long, global = true)]
    pub no_lock: bool,
}

#[derive(Subcommand)]
pub enum MigrateAction {
    /// Run all pending migrations (default behavior).
    Up,

    /// Show applied and pending migrations.
    Status,
}

type PgOrchestrator = Orchestrator<PgLedger, EngineExecutor>;

impl MigrateCommand {
    pub async fn execute(self, verbose: bool) -> Result<Outcome> {
        // Load .env if present
        dotenvy::dotenv().ok();

        let config_path = Path::new(&self.config);
        if !config_path.exists() {
            anyhow::bail!("Configuration file not found: {}", self.config);
        }

        let config = QuarryConfig::from_file(config_path)?;
        crate::logging::init(&config.logging, verbose);

        let env = config.environment(self.env)?;
        let migrations_dir = self
            .migrations_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| config.migrations.dir.clone());

        let orchestrator = Orchestrator::new(
            &migrations_dir,
            env.clone(),
            PgLedger::new(env.clone(), config.migrations.table.clone()),
            EngineExecutor::from_config(&config.engine, config.migrations.timeout_secs),
        )
        .with_extension(config.migrations.extension.clone());

        println!();
        println!(
            "  {}  {} Migrations ({} → {})",
            style("⛏").bold(),
            style("quarry").bold().cyan(),
            self.env,
            style(&env.database).cyan()
        );
        println!();

        match self.action.unwrap_or(MigrateAction::Up) {
            MigrateAction::Up => {
                let lock = config.migrations.lock && !self.no_lock;
                up(&orchestrator, &env, lock).await
            }
            MigrateAction::Status => {
                let status = orchestrator.status().await?;
                print_status(&status);
                Ok(Outcome::Success)
            }
        }
    }
}

async fn up(
    orchestrator: &PgOrchestrator,
    env: &EnvironmentConfig,
    lock: bool,
) -> Result<Outcome> {
    let lock = if lock {
        let lock = MigrationLock::acquire(env)
            .await
            .context("Could not take the migration lock (use --no-lock to skip it)")?;
        Some(lock)
    } else {
        None
    };

    println!("  {} Running pending migrations...", style("→").dim());
    let result = orchestrator.run().await;

    // Always release lock, even on error
    if let Some(lock) = lock {
        if let Err(e) = lock.release().await {
            warn!("Failed to release migration lock: {}", e);
        }
    }

    let report = result?;
    print_report(&report, orchestrator.migrations_dir());

    if report.is_success() {
        Ok(Outcome::Success)
    } else {
        Ok(Outcome::MigrationFailed)
    }
}

fn print_bootstrap(reason: &Option<String>) {
    if let Some(reason) = reason {
        println!(
            "  {} No ledger found, treating as a fresh install ({})",
            style("ℹ").blue(),
            style(reason).dim()
        );
    }
}

fn print_report(report: &RunReport, migrations_dir: &Path) {
    print_bootstrap(&report.bootstrap);

    if report.nothing_to_do() {
        println!(
            "  {} No migrations to perform at path {}",
            style("ℹ").blue(),
            migrations_dir.display()
        );
        println!();
        return;
    }

    for name in &report.completed {
        println!("  {} {}", style("✓").green(), name);
    }

    if let Some(failure) = &report.failure {
        println!(
            "  {} {} {}",
            style("✗").red(),
            style(&failure.migration).red(),
            style(&failure.reason).dim()
        );
        for line in failure.output.lines() {
            println!("      {}", style(line).dim());
        }
        println!("  {} All further migrations cancelled", style("!").yellow());
    }

    for name in &report.unrecorded {
        println!(
            "  {} {} ran but is not in the ledger and will run again next time",
            style("!").yellow(),
            name
        );
    }

    println!();
    println!(
        "  {} {} migration(s) applied",
        if report.is_success() {
            style("✓").green()
        } else {
            style("✗").red()
        },
        report.completed.len()
    );
    println!();
}

fn print_status(status: &MigrationStatus) {
    print_bootstrap(&status.bootstrap);

    if status.applied.is_empty() && status.pending.is_empty() {
        println!("  {} No migrations found", style("ℹ").blue());
        println!();
        return;
    }

    if !status.applied.is_empty() {
        println!("  {} Applied:", style("✓").green());
        for name in &status.applied {
            println!("    {} {}", style("-").dim(), style(name).cyan());
        }
    }

    if !status.pending.is_empty() {
        if !status.applied.is_empty() {
            println!();
        }
        println!("  {} Pending:", style("○").yellow());
        for name in &status.pending {
            println!("    {} {}", style("→").dim(), style(name).yellow());
        }
    }

    println!();
    println!(
        "  {} {} applied, {} pending",
        style("ℹ").blue(),
        status.applied.len(),
        status.pending.len()
    );
    println!();
}
