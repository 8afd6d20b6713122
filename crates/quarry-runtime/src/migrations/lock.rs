//! Run lock so only one process migrates a database at a time.
//!
//! The lock is a PostgreSQL session advisory lock taken on the administrative
//! database, which exists even before the target database is created.

use sqlx::postgres::PgConnection;
use sqlx::Connection;
use tracing::{debug, warn};

use quarry_core::config::EnvironmentConfig;
use quarry_core::error::{QuarryError, Result};

use crate::db;

/// Advisory lock key for a target database.
pub fn lock_key(database: &str) -> String {
    format!("quarry:{}", database)
}

/// An acquired run lock. Released by [`MigrationLock::release`], or by the
/// server when the connection drops.
pub struct MigrationLock {
    conn: PgConnection,
    key: String,
}

impl MigrationLock {
    /// Block until the lock for `env.database` is held.
    pub async fn acquire(env: &EnvironmentConfig) -> Result<Self> {
        let key = lock_key(&env.database);
        let mut conn = db::connect(env, &env.admin_database)
            .await
            .map_err(|e| QuarryError::Lock(e.to_string()))?;

        debug!("Acquiring migration lock {}...", key);
        sqlx::query("SELECT pg_advisory_lock(hashtext($1)::bigint)")
            .bind(&key)
            .execute(&mut conn)
            .await
            .map_err(|e| QuarryError::Lock(format!("Failed to acquire {}: {}", key, e)))?;
        debug!("Migration lock {} acquired", key);

        Ok(Self { conn, key })
    }

    pub async fn release(mut self) -> Result<()> {
        let unlocked = sqlx::query_scalar::<_, bool>(
            "SELECT pg_advisory_unlock(hashtext($1)::bigint)",
        )
        .bind(&self.key)
        .fetch_one(&mut self.conn)
        .await
        .map_err(|e| QuarryError::Lock(format!("Failed to release {}: {}", self.key, e)))?;

        if !unlocked {
            warn!("Migration lock {} was not held at release", self.key);
        }

        if let Err(e) = self.conn.close().await {
            debug!("Failed to close lock connection: {}", e);
        }

        debug!("Migration lock {} released", self.key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestDatabase;
    use std::time::Duration;

    #[test]
    fn test_lock_key_is_per_database() {
        assert_eq!(lock_key("shop_development"), "quarry:shop_development");
        assert_ne!(lock_key("shop_test"), lock_key("shop_development"));
    }

    #[tokio::test]
    async fn test_acquire_unreachable_server_is_lock_error() {
        let mut env = EnvironmentConfig::new("shop_test", "shop", "secret");
        env.host = Some("127.0.0.1".to_string());
        env.port = Some(1);

        let err = MigrationLock::acquire(&env).await.err().unwrap();
        assert!(matches!(err, QuarryError::Lock(_)));
    }

    #[tokio::test]
    async fn test_release_frees_lock_for_next_session() {
        if !TestDatabase::is_configured() {
            return;
        }
        let db = TestDatabase::from_env().await.unwrap();
        // Only the admin database is touched, so the target need not exist.
        let env = db
            .environment(&TestDatabase::unique_name("lock_release"))
            .unwrap();
        let key = lock_key(&env.database);

        let lock = MigrationLock::acquire(&env).await.unwrap();
        assert_eq!(db.advisory_lock_count(&key).await.unwrap(), 1);

        lock.release().await.unwrap();
        assert_eq!(db.advisory_lock_count(&key).await.unwrap(), 0);

        let again = tokio::time::timeout(Duration::from_secs(5), MigrationLock::acquire(&env))
            .await
            .expect("released lock should not block")
            .unwrap();
        assert_eq!(db.advisory_lock_count(&key).await.unwrap(), 1);
        again.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_locks_are_independent_per_database() {
        if !TestDatabase::is_configured() {
            return;
        }
        let db = TestDatabase::from_env().await.unwrap();
        let first = db.environment(&TestDatabase::unique_name("lock_a")).unwrap();
        let second = db.environment(&TestDatabase::unique_name("lock_b")).unwrap();

        let held = MigrationLock::acquire(&first).await.unwrap();
        let other = tokio::time::timeout(Duration::from_secs(5), MigrationLock::acquire(&second))
            .await
            .expect("a different database should not wait")
            .unwrap();

        other.release().await.unwrap();
        held.release().await.unwrap();
    }
}
