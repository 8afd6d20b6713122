//! The ledger of applied migrations, stored in the target database.
//!
//! Reading the ledger never fails: when the database or the ledger table does
//! not exist yet, the reader reports [`LedgerState::Bootstrap`] so the first
//! migrations (create database, create tables) can run. A transient outage
//! looks exactly like a fresh install, so the reason is kept for the caller to
//! log and report.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use sqlx::Connection;
use tracing::debug;

use quarry_core::config::EnvironmentConfig;
use quarry_core::error::{QuarryError, Result};
use quarry_core::{STATUS_COMPLETE, TOOL_VERSION};

use crate::db;

/// What the ledger says about previously applied migrations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerState {
    /// The ledger was read; these names have been applied.
    Recorded(HashSet<String>),
    /// The ledger could not be read and is treated as empty.
    Bootstrap { reason: String },
}

impl LedgerState {
    pub fn contains(&self, migration: &str) -> bool {
        match self {
            LedgerState::Recorded(applied) => applied.contains(migration),
            LedgerState::Bootstrap { .. } => false,
        }
    }

    pub fn is_bootstrap(&self) -> bool {
        matches!(self, LedgerState::Bootstrap { .. })
    }
}

/// Durable record of applied migrations.
pub trait Ledger: Send + Sync {
    /// Read the applied migration names.
    fn applied(&self) -> Pin<Box<dyn Future<Output = LedgerState> + Send + '_>>;

    /// Append one completed migration.
    fn record<'a>(
        &'a self,
        migration: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Ledger table in a PostgreSQL target database.
///
/// Every call opens its own connection and closes it before returning, so a
/// database created mid-run is picked up by the next write.
pub struct PgLedger {
    env: EnvironmentConfig,
    table: String,
}

impl PgLedger {
    /// `table` must already be a validated identifier; it is interpolated into
    /// the SQL.
    pub fn new(env: EnvironmentConfig, table: impl Into<String>) -> Self {
        Self {
            env,
            table: table.into(),
        }
    }

    fn select_sql(&self) -> String {
        format!(
            "SELECT migration_version FROM {} ORDER BY id DESC",
            self.table
        )
    }

    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (updated_at, tool_version, migration_version, status) \
             VALUES (NOW(), $1, $2, $3)",
            self.table
        )
    }

    async fn read(&self) -> Result<HashSet<String>> {
        let mut conn = db::connect(&self.env, &self.env.database).await?;
        debug!(
            "Opened database {} for user {}",
            self.env.database, self.env.user
        );

        let sql = self.select_sql();
        let rows = sqlx::query_scalar::<_, String>(&sql)
            .fetch_all(&mut conn)
            .await;

        if let Err(e) = conn.close().await {
            debug!("Failed to close ledger connection: {}", e);
        }

        Ok(rows?.into_iter().collect())
    }

    async fn write(&self, migration: &str) -> Result<()> {
        let persistence_error = |reason: String| QuarryError::Persistence {
            migration: migration.to_string(),
            reason,
        };

        let mut conn = db::connect(&self.env, &self.env.database)
            .await
            .map_err(|e| persistence_error(e.to_string()))?;

        let sql = self.insert_sql();
        let result = sqlx::query(&sql)
            .bind(TOOL_VERSION)
            .bind(migration)
            .bind(STATUS_COMPLETE)
            .execute(&mut conn)
            .await;

        if let Err(e) = conn.close().await {
            debug!("Failed to close ledger connection: {}", e);
        }

        result.map_err(|e| persistence_error(e.to_string()))?;
        debug!("Recorded migration {} in {}", migration, self.table);
        Ok(())
    }
}

impl Ledger for PgLedger {
    fn applied(&self) -> Pin<Box<dyn Future<Output = LedgerState> + Send + '_>> {
        Box::pin(async move {
            match self.read().await {
                Ok(applied) => LedgerState::Recorded(applied),
                Err(e) => LedgerState::Bootstrap {
                    reason: e.to_string(),
                },
            }
        })
    }

    fn record<'a>(
        &'a self,
        migration: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.write(migration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestDatabase;
    use quarry_core::LEDGER_TABLE;

    fn ledger() -> PgLedger {
        PgLedger::new(
            EnvironmentConfig::new("shop_test", "shop", "secret"),
            "quarry_metadata",
        )
    }

    #[test]
    fn test_select_sql() {
        assert_eq!(
            ledger().select_sql(),
            "SELECT migration_version FROM quarry_metadata ORDER BY id DESC"
        );
    }

    #[test]
    fn test_insert_sql_targets_table() {
        let sql = ledger().insert_sql();
        assert!(sql.starts_with("INSERT INTO quarry_metadata"));
        assert!(sql.contains("migration_version"));
        assert!(sql.contains("NOW()"));
    }

    #[test]
    fn test_ledger_state_membership() {
        let recorded = LedgerState::Recorded(HashSet::from(["a.sql".to_string()]));
        assert!(recorded.contains("a.sql"));
        assert!(!recorded.contains("b.sql"));
        assert!(!recorded.is_bootstrap());

        let bootstrap = LedgerState::Bootstrap {
            reason: "database \"shop_test\" does not exist".to_string(),
        };
        assert!(bootstrap.is_bootstrap());
        assert!(!bootstrap.contains("a.sql"));
    }

    #[tokio::test]
    async fn test_unreachable_database_is_bootstrap() {
        let mut env = EnvironmentConfig::new("shop_test", "shop", "secret");
        env.host = Some("127.0.0.1".to_string());
        env.port = Some(1);

        let state = PgLedger::new(env, "quarry_metadata").applied().await;
        assert!(state.is_bootstrap());
    }

    #[tokio::test]
    async fn test_record_then_read_on_postgres() {
        if !TestDatabase::is_configured() {
            return;
        }
        let db = TestDatabase::from_env().await.unwrap();
        let target = db.isolated("ledger_round_trip").await.unwrap();
        let ledger = PgLedger::new(target.environment().clone(), LEDGER_TABLE);

        // No table yet.
        assert!(ledger.applied().await.is_bootstrap());
        assert!(ledger.record("2020-01-01-Create-Database.sql").await.is_err());

        target.create_ledger_table(LEDGER_TABLE).await.unwrap();
        ledger.record("2020-01-01-Create-Database.sql").await.unwrap();
        ledger.record("2020-01-02-Create-Tables.sql").await.unwrap();

        assert_eq!(
            ledger.applied().await,
            LedgerState::Recorded(HashSet::from([
                "2020-01-01-Create-Database.sql".to_string(),
                "2020-01-02-Create-Tables.sql".to_string(),
            ]))
        );

        let rows = sqlx::query_as::<_, (String, String, i32)>(
            "SELECT migration_version, tool_version, status FROM quarry_metadata ORDER BY id",
        )
        .fetch_all(target.pool())
        .await
        .unwrap();
        assert_eq!(
            rows,
            [
                (
                    "2020-01-01-Create-Database.sql".to_string(),
                    TOOL_VERSION.to_string(),
                    STATUS_COMPLETE
                ),
                (
                    "2020-01-02-Create-Tables.sql".to_string(),
                    TOOL_VERSION.to_string(),
                    STATUS_COMPLETE
                ),
            ]
        );

        target.cleanup().await.unwrap();
    }
}
