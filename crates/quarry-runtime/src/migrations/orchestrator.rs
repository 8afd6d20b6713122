//! Runs pending migrations in order and keeps the ledger up to date.
//!
//! One run walks through these states:
//!
//! ```text
//! Idle -> Discovering -> Resolving -> Executing(0..n) -> Persisting -> Done
//!                                            \
//!                                             -> Failed
//! ```
//!
//! A failed migration moves the run straight from `Executing` to `Failed`.
//! Ledger entries deferred before the failure are still flushed, so earlier
//! successes reach the ledger.
//!
//! Each success is written to the ledger as soon as it completes. When that
//! write fails (typically because the ledger table is created by a later
//! migration in the same run) it is retried once after the last migration.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use quarry_core::config::EnvironmentConfig;
use quarry_core::error::{QuarryError, Result};

use super::discovery::{discover, MigrationFile};
use super::executor::ScriptRunner;
use super::ledger::{Ledger, LedgerState};

/// Orchestrator state, logged on every transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    Idle,
    Discovering,
    Resolving,
    Executing(usize),
    Failed,
    Persisting,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Discovering => write!(f, "discovering"),
            RunState::Resolving => write!(f, "resolving"),
            RunState::Executing(i) => write!(f, "executing({})", i),
            RunState::Failed => write!(f, "failed"),
            RunState::Persisting => write!(f, "persisting"),
            RunState::Done => write!(f, "done"),
        }
    }
}

/// The migration that stopped a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFailure {
    pub migration: String,
    pub reason: String,
    /// Captured engine output, empty when the engine never started.
    pub output: String,
}

impl From<MigrationFailure> for QuarryError {
    fn from(failure: MigrationFailure) -> Self {
        QuarryError::Execution {
            migration: failure.migration,
            reason: failure.reason,
        }
    }
}

/// Result of one orchestrator run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Migrations that succeeded in this run, in execution order.
    pub completed: Vec<String>,
    /// Set when a migration failed; later migrations were not attempted.
    pub failure: Option<MigrationFailure>,
    /// Why the ledger was treated as empty, if it was.
    pub bootstrap: Option<String>,
    /// Completed migrations the ledger could not record.
    pub unrecorded: Vec<String>,
    /// States the run moved through after `Idle`, in order.
    pub states: Vec<RunState>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// The state the run ended in.
    pub fn state(&self) -> RunState {
        self.states.last().copied().unwrap_or_default()
    }

    /// Nothing was pending.
    pub fn nothing_to_do(&self) -> bool {
        self.completed.is_empty() && self.failure.is_none()
    }
}

/// Applied and pending migrations, without running anything.
#[derive(Debug, Clone, Default)]
pub struct MigrationStatus {
    /// Discovered migrations already in the ledger.
    pub applied: Vec<String>,
    /// Discovered migrations not yet in the ledger, in run order.
    pub pending: Vec<String>,
    /// Why the ledger was treated as empty, if it was.
    pub bootstrap: Option<String>,
}

/// Files not yet in the ledger, in discovery order.
pub fn pending<'a>(files: &'a [MigrationFile], ledger: &LedgerState) -> Vec<&'a MigrationFile> {
    files.iter().filter(|f| !ledger.contains(&f.name)).collect()
}

/// Drives discovery, execution and ledger writes for one environment.
pub struct Orchestrator<L, R> {
    migrations_dir: PathBuf,
    extension: String,
    env: EnvironmentConfig,
    ledger: L,
    runner: R,
}

impl<L: Ledger, R: ScriptRunner> Orchestrator<L, R> {
    pub fn new(
        migrations_dir: impl Into<PathBuf>,
        env: EnvironmentConfig,
        ledger: L,
        runner: R,
    ) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            extension: "sql".to_string(),
            env,
            ledger,
            runner,
        }
    }

    /// Script extension to discover, without the dot.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    async fn read_ledger(&self) -> LedgerState {
        let ledger = self.ledger.applied().await;

        match &ledger {
            LedgerState::Recorded(applied) => {
                debug!(
                    "Ledger for {} lists {} applied migrations",
                    self.env.database,
                    applied.len()
                );
            }
            LedgerState::Bootstrap { reason } => {
                warn!(
                    "No ledger found for database {}, assuming a fresh install: {}",
                    self.env.database, reason
                );
            }
        }

        ledger
    }

    /// Report applied and pending migrations without running any.
    pub async fn status(&self) -> Result<MigrationStatus> {
        let files = discover(&self.migrations_dir, &self.extension)?;
        let ledger = self.read_ledger().await;

        let (applied, pending): (Vec<_>, Vec<_>) =
            files.into_iter().partition(|f| ledger.contains(&f.name));

        Ok(MigrationStatus {
            applied: applied.into_iter().map(|f| f.name).collect(),
            pending: pending.into_iter().map(|f| f.name).collect(),
            bootstrap: bootstrap_reason(&ledger),
        })
    }

    /// Run every pending migration in order, stopping at the first failure.
    ///
    /// Returns `Err` only when discovery fails, before anything runs. A failed
    /// migration is reported in [`RunReport::failure`].
    pub async fn run(&self) -> Result<RunReport> {
        let mut report = RunReport::default();

        advance(&mut report.states, RunState::Discovering);
        let files = discover(&self.migrations_dir, &self.extension)?;

        advance(&mut report.states, RunState::Resolving);
        let ledger = self.read_ledger().await;
        report.bootstrap = bootstrap_reason(&ledger);

        let pending = pending(&files, &ledger);
        if pending.is_empty() {
            debug!(
                "No migrations to perform at path {}",
                self.migrations_dir.display()
            );
            advance(&mut report.states, RunState::Done);
            return Ok(report);
        }

        info!(
            "{} pending migrations for database {}",
            pending.len(),
            self.env.database
        );

        let mut deferred = Vec::new();

        for (i, migration) in pending.into_iter().enumerate() {
            advance(&mut report.states, RunState::Executing(i));
            info!("Running migration {}", migration.name);

            let outcome = match self.runner.run(migration, &self.env).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Could not run migration {}: {}", migration.name, e);
                    report.failure = Some(MigrationFailure {
                        migration: migration.name.clone(),
                        reason: e.to_string(),
                        output: String::new(),
                    });
                    break;
                }
            };

            if let Some(reason) = outcome.failure_reason() {
                error!(
                    "Migration {} failed ({}):\n{}",
                    migration.name, reason, outcome.output
                );
                report.failure = Some(MigrationFailure {
                    migration: migration.name.clone(),
                    reason,
                    output: outcome.output,
                });
                break;
            }

            info!("Completed migration {}\n{}", migration.name, outcome.output);
            report.completed.push(migration.name.clone());

            if let Err(e) = self.ledger.record(&migration.name).await {
                warn!("Deferring ledger entry for {}: {}", migration.name, e);
                deferred.push(migration.name.clone());
            }
        }

        if report.failure.is_some() {
            advance(&mut report.states, RunState::Failed);
            warn!("All further migrations cancelled");
        } else {
            advance(&mut report.states, RunState::Persisting);
        }

        for name in deferred {
            if let Err(e) = self.ledger.record(&name).await {
                error!("{}", e);
                report.unrecorded.push(name);
            }
        }

        match (&report.failure, report.completed.last()) {
            (None, Some(last)) => {
                advance(&mut report.states, RunState::Done);
                info!(
                    "Migrations complete up to migration {} on db {}",
                    last, self.env.database
                );
            }
            (Some(failure), _) => {
                info!(
                    "Stopped at migration {} on db {} after {} completed",
                    failure.migration,
                    self.env.database,
                    report.completed.len()
                );
            }
            (None, None) => advance(&mut report.states, RunState::Done),
        }

        Ok(report)
    }
}

fn advance(states: &mut Vec<RunState>, next: RunState) {
    let current = states.last().copied().unwrap_or_default();
    debug!("Migration run {} -> {}", current, next);
    states.push(next);
}

fn bootstrap_reason(ledger: &LedgerState) -> Option<String> {
    match ledger {
        LedgerState::Bootstrap { reason } => Some(reason.clone()),
        LedgerState::Recorded(_) => None,
    }
}
