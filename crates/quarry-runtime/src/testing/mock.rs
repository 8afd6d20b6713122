use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use quarry_core::config::EnvironmentConfig;
use quarry_core::error::{QuarryError, Result};

use crate::migrations::{
    target_database, ExecutionOutcome, ExecutionStatus, Ledger, LedgerState, MigrationFile,
    ScriptRunner,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct LedgerInner {
    entries: Vec<String>,
    table_exists: bool,
    rejected_writes: usize,
    attempts: usize,
}

/// In-memory ledger. Clones share the same entries.
///
/// ```ignore
/// // Fresh install: reads report bootstrap until the first write lands,
/// // and the first write fails as if the table did not exist yet.
/// let ledger = FakeLedger::bootstrap().rejecting_writes(1);
/// ```
#[derive(Debug, Clone)]
pub struct FakeLedger {
    inner: Arc<Mutex<LedgerInner>>,
}

impl FakeLedger {
    /// An existing, empty ledger table.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(LedgerInner {
                table_exists: true,
                ..Default::default()
            })),
        }
    }

    /// A ledger table holding `names`.
    pub fn with_applied<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ledger = Self::new();
        lock(&ledger.inner)
            .entries
            .extend(names.into_iter().map(Into::into));
        ledger
    }

    /// No database and no ledger table yet.
    pub fn bootstrap() -> Self {
        Self {
            inner: Arc::new(Mutex::new(LedgerInner::default())),
        }
    }

    /// Fail the next `count` writes.
    pub fn rejecting_writes(self, count: usize) -> Self {
        lock(&self.inner).rejected_writes = count;
        self
    }

    /// Every entry, in write order.
    pub fn recorded(&self) -> Vec<String> {
        lock(&self.inner).entries.clone()
    }

    /// Number of write attempts, successful or not.
    pub fn record_attempts(&self) -> usize {
        lock(&self.inner).attempts
    }
}

impl Default for FakeLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger for FakeLedger {
    fn applied(&self) -> Pin<Box<dyn Future<Output = LedgerState> + Send + '_>> {
        let inner = lock(&self.inner);
        let state = if inner.table_exists {
            LedgerState::Recorded(inner.entries.iter().cloned().collect())
        } else {
            LedgerState::Bootstrap {
                reason: "relation \"quarry_metadata\" does not exist".to_string(),
            }
        };
        Box::pin(async move { state })
    }

    fn record<'a>(
        &'a self,
        migration: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        let result = {
            let mut inner = lock(&self.inner);
            inner.attempts += 1;
            if inner.rejected_writes > 0 {
                inner.rejected_writes -= 1;
                Err(QuarryError::Persistence {
                    migration: migration.to_string(),
                    reason: "relation \"quarry_metadata\" does not exist".to_string(),
                })
            } else {
                inner.table_exists = true;
                inner.entries.push(migration.to_string());
                Ok(())
            }
        };
        Box::pin(async move { result })
    }
}

/// Scripted SQL engine. Every migration succeeds unless marked otherwise.
/// Clones share the same call log.
#[derive(Debug, Clone, Default)]
pub struct FakeRunner {
    failing: HashSet<String>,
    unlaunchable: HashSet<String>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `migration` report an SQL error.
    pub fn failing(mut self, migration: impl Into<String>) -> Self {
        self.failing.insert(migration.into());
        self
    }

    /// Make `migration` fail to launch.
    pub fn unlaunchable(mut self, migration: impl Into<String>) -> Self {
        self.unlaunchable.insert(migration.into());
        self
    }

    /// Names of the migrations run, in order.
    pub fn executed(&self) -> Vec<String> {
        lock(&self.calls).iter().map(|(name, _)| name.clone()).collect()
    }

    /// `(migration, database)` pairs, in order.
    pub fn targets(&self) -> Vec<(String, String)> {
        lock(&self.calls).clone()
    }
}

impl ScriptRunner for FakeRunner {
    fn run<'a>(
        &'a self,
        migration: &'a MigrationFile,
        env: &'a EnvironmentConfig,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionOutcome>> + Send + 'a>> {
        lock(&self.calls).push((
            migration.name.clone(),
            target_database(migration, env).to_string(),
        ));

        let result = if self.unlaunchable.contains(&migration.name) {
            Err(QuarryError::Launch {
                program: "fake-engine".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            })
        } else if self.failing.contains(&migration.name) {
            Ok(ExecutionOutcome {
                output: format!("psql:{}:1: ERROR:  syntax error", migration.name),
                status: ExecutionStatus::EmbeddedError,
            })
        } else {
            Ok(ExecutionOutcome {
                output: format!("-- {}", migration.name),
                status: ExecutionStatus::Succeeded,
            })
        };

        Box::pin(async move { result })
    }
}
