//! Runs one migration script through the external SQL engine.
//!
//! The engine is invoked as `<program> <args...> -f <script>` with the
//! connection settings passed through `PG*` variables on the child process
//! only. A run succeeds when the engine exits with status 0 and its combined
//! output contains no `ERROR`.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use quarry_core::config::{EngineConfig, EnvironmentConfig};
use quarry_core::error::{QuarryError, Result};

use super::discovery::MigrationFile;

/// How a single script run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Succeeded,
    /// The engine exited unsuccessfully (`None` when killed by a signal).
    ExitFailure(Option<i32>),
    /// The engine exited cleanly but reported an error in its output.
    EmbeddedError,
    /// The timeout expired and the engine was killed.
    TimedOut,
}

/// Raw output plus verdict for one script.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Combined stdout and stderr.
    pub output: String,
    pub status: ExecutionStatus,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }

    /// Human readable reason, `None` on success.
    pub fn failure_reason(&self) -> Option<String> {
        match self.status {
            ExecutionStatus::Succeeded => None,
            ExecutionStatus::ExitFailure(Some(code)) => {
                Some(format!("engine exited with status {}", code))
            }
            ExecutionStatus::ExitFailure(None) => Some("engine killed by signal".to_string()),
            ExecutionStatus::EmbeddedError => Some("engine reported ERROR".to_string()),
            ExecutionStatus::TimedOut => Some("timed out".to_string()),
        }
    }
}

/// Runs one migration script.
///
/// Returns `Err` only when the script could not be run at all. A script that
/// ran and failed is an `Ok` outcome with a failed status.
pub trait ScriptRunner: Send + Sync {
    fn run<'a>(
        &'a self,
        migration: &'a MigrationFile,
        env: &'a EnvironmentConfig,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionOutcome>> + Send + 'a>>;
}

/// Database a migration connects to. The create-database migration runs
/// against the administrative database because the target does not exist yet.
pub fn target_database<'a>(migration: &MigrationFile, env: &'a EnvironmentConfig) -> &'a str {
    if migration.creates_database() {
        &env.admin_database
    } else {
        &env.database
    }
}

/// Judge an engine run. Some engines exit 0 after an in-script failure, so
/// the output is checked too.
pub fn classify(exit_success: bool, exit_code: Option<i32>, output: &str) -> ExecutionStatus {
    if !exit_success {
        ExecutionStatus::ExitFailure(exit_code)
    } else if output.contains("ERROR") {
        ExecutionStatus::EmbeddedError
    } else {
        ExecutionStatus::Succeeded
    }
}

/// Runs scripts through an external SQL engine such as `psql`.
///
/// Credentials reach the engine through its own environment (`PGUSER`,
/// `PGPASSWORD`, `PGDATABASE`, `PGHOST`, `PGPORT`), never its arguments.
#[derive(Debug, Clone)]
pub struct EngineExecutor {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl EngineExecutor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn from_config(engine: &EngineConfig, timeout_secs: u64) -> Self {
        let executor = Self::new(engine.program.clone()).with_args(engine.args.clone());
        if timeout_secs > 0 {
            executor.with_timeout(Duration::from_secs(timeout_secs))
        } else {
            executor
        }
    }

    /// Arguments placed before `-f <script>`.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn command(&self, migration: &MigrationFile, env: &EnvironmentConfig) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("-f")
            .arg(&migration.path)
            .env("PGUSER", &env.user)
            .env("PGPASSWORD", &env.password)
            .env("PGDATABASE", target_database(migration, env))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(host) = &env.host {
            cmd.env("PGHOST", host);
        }
        if let Some(port) = env.port {
            cmd.env("PGPORT", port.to_string());
        }

        cmd
    }

    /// Run one script and wait for the engine to exit.
    pub async fn execute(
        &self,
        migration: &MigrationFile,
        env: &EnvironmentConfig,
    ) -> Result<ExecutionOutcome> {
        debug!(
            "Running {} against {} with {}",
            migration.name,
            target_database(migration, env),
            self.program
        );

        let launch_error = |source| QuarryError::Launch {
            program: self.program.clone(),
            source,
        };

        // Dropping the output future on timeout kills the child.
        let output = self.command(migration, env).output();
        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, output).await {
                Ok(result) => result.map_err(launch_error)?,
                Err(_) => {
                    return Ok(ExecutionOutcome {
                        output: format!("{} killed after {:?}", self.program, limit),
                        status: ExecutionStatus::TimedOut,
                    });
                }
            },
            None => output.await.map_err(launch_error)?,
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        let status = classify(output.status.success(), output.status.code(), &combined);
        Ok(ExecutionOutcome {
            output: combined,
            status,
        })
    }
}

impl ScriptRunner for EngineExecutor {
    fn run<'a>(
        &'a self,
        migration: &'a MigrationFile,
        env: &'a EnvironmentConfig,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionOutcome>> + Send + 'a>> {
        Box::pin(self.execute(migration, env))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use std::fs;
    use tempfile::TempDir;

    fn env() -> EnvironmentConfig {
        EnvironmentConfig::new("shop_test", "shop", "s3cret")
    }

    /// A stand-in engine: `sh -c <script> sh -f <path>`, so the script sees
    /// the migration path as `$2`.
    fn shell(script: &str) -> EngineExecutor {
        EngineExecutor::new("sh").with_args(vec![
            "-c".to_string(),
            script.to_string(),
            "sh".to_string(),
        ])
    }

    fn migration(dir: &TempDir, name: &str, sql: &str) -> MigrationFile {
        let path = dir.path().join(name);
        fs::write(&path, sql).unwrap();
        MigrationFile::new(name, path)
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(true, Some(0), "CREATE TABLE"), ExecutionStatus::Succeeded);
        assert_eq!(
            classify(true, Some(0), "psql:x.sql:3: ERROR:  relation exists"),
            ExecutionStatus::EmbeddedError
        );
        assert_eq!(
            classify(false, Some(2), "CREATE TABLE"),
            ExecutionStatus::ExitFailure(Some(2))
        );
        assert_eq!(classify(true, Some(0), "error: lowercase"), ExecutionStatus::Succeeded);
    }

    #[test]
    fn test_target_database_override() {
        let env = env();
        let create = MigrationFile::new("2020-01-01-Create-Database.sql", "a");
        let tables = MigrationFile::new("2020-01-02-Create-Tables.sql", "b");
        assert_eq!(target_database(&create, &env), "postgres");
        assert_eq!(target_database(&tables, &env), "shop_test");
    }

    #[test]
    fn test_credentials_passed_through_environment_only() {
        let mut env = env();
        env.host = Some("db.internal".to_string());
        env.port = Some(5433);
        let executor = EngineExecutor::new("psql").with_args(vec!["--no-psqlrc".to_string()]);
        let migration = MigrationFile::new("2020-01-02-Create-Tables.sql", "/tmp/m.sql");

        let cmd = executor.command(&migration, &env);
        let std_cmd = cmd.as_std();

        let args: Vec<_> = std_cmd.get_args().collect();
        assert_eq!(
            args,
            [
                OsStr::new("--no-psqlrc"),
                OsStr::new("-f"),
                OsStr::new("/tmp/m.sql")
            ]
        );
        assert!(!args.iter().any(|a| a.to_string_lossy().contains("s3cret")));

        let envs: Vec<_> = std_cmd.get_envs().collect();
        assert!(envs.contains(&(OsStr::new("PGPASSWORD"), Some(OsStr::new("s3cret")))));
        assert!(envs.contains(&(OsStr::new("PGUSER"), Some(OsStr::new("shop")))));
        assert!(envs.contains(&(OsStr::new("PGDATABASE"), Some(OsStr::new("shop_test")))));
        assert!(envs.contains(&(OsStr::new("PGHOST"), Some(OsStr::new("db.internal")))));
        assert!(envs.contains(&(OsStr::new("PGPORT"), Some(OsStr::new("5433")))));
    }

    #[tokio::test]
    async fn test_execute_success_sees_script_and_environment() {
        let dir = TempDir::new().unwrap();
        let m = migration(&dir, "2020-01-02-Create-Tables.sql", "CREATE TABLE users();");
        let executor = shell(r#"cat "$2"; echo "db=$PGDATABASE user=$PGUSER""#);

        let outcome = executor.execute(&m, &env()).await.unwrap();
        assert!(outcome.succeeded());
        assert!(outcome.output.contains("CREATE TABLE users();"));
        assert!(outcome.output.contains("db=shop_test user=shop"));
    }

    #[tokio::test]
    async fn test_execute_create_database_uses_admin_database() {
        let dir = TempDir::new().unwrap();
        let m = migration(&dir, "2020-01-01-Create-Database.sql", "CREATE DATABASE shop;");
        let executor = shell(r#"echo "db=$PGDATABASE""#);

        let outcome = executor.execute(&m, &env()).await.unwrap();
        assert!(outcome.output.contains("db=postgres"));
    }

    #[tokio::test]
    async fn test_execute_nonzero_exit() {
        let dir = TempDir::new().unwrap();
        let m = migration(&dir, "2020-01-02-Bad.sql", "");
        let executor = shell("echo 'could not connect' >&2; exit 3");

        let outcome = executor.execute(&m, &env()).await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::ExitFailure(Some(3)));
        assert!(outcome.output.contains("could not connect"));
        assert!(outcome.failure_reason().unwrap().contains('3'));
    }

    #[tokio::test]
    async fn test_execute_embedded_error_with_clean_exit() {
        let dir = TempDir::new().unwrap();
        let m = migration(&dir, "2020-01-02-Dup.sql", "");
        let executor = shell("echo 'ERROR:  relation \"users\" already exists' >&2; exit 0");

        let outcome = executor.execute(&m, &env()).await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::EmbeddedError);
        assert!(!outcome.succeeded());
    }

    #[tokio::test]
    async fn test_execute_timeout_kills_engine() {
        let dir = TempDir::new().unwrap();
        let m = migration(&dir, "2020-01-02-Slow.sql", "");
        let executor = shell("sleep 10").with_timeout(Duration::from_millis(100));

        let outcome = executor.execute(&m, &env()).await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_execute_missing_program_is_launch_error() {
        let dir = TempDir::new().unwrap();
        let m = migration(&dir, "2020-01-02-Create-Tables.sql", "");
        let executor = EngineExecutor::new("/nonexistent/bin/quarry-engine");

        let err = executor.execute(&m, &env()).await.unwrap_err();
        assert!(matches!(err, QuarryError::Launch { .. }));
    }

    #[test]
    fn test_from_config_timeout() {
        let engine = EngineConfig::default();
        assert!(EngineExecutor::from_config(&engine, 0).timeout.is_none());
        assert_eq!(
            EngineExecutor::from_config(&engine, 30).timeout,
            Some(Duration::from_secs(30))
        );
    }
}
