use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;

use quarry_core::config::{Adapter, EnvironmentConfig};
use quarry_core::error::{QuarryError, Result};

/// Build connection options for `database` using an environment's credentials.
pub fn connect_options(env: &EnvironmentConfig, database: &str) -> PgConnectOptions {
    match env.adapter {
        Adapter::Postgres => {
            let mut options = PgConnectOptions::new()
                .username(&env.user)
                .password(&env.password)
                .database(database);

            if let Some(host) = &env.host {
                options = options.host(host);
            }
            if let Some(port) = env.port {
                options = options.port(port);
            }

            options
        }
    }
}

/// Open a single short-lived connection. Callers close it when done.
pub async fn connect(env: &EnvironmentConfig, database: &str) -> Result<PgConnection> {
    PgConnection::connect_with(&connect_options(env, database))
        .await
        .map_err(|e| QuarryError::Database(format!("Failed to connect to {}: {}", database, e)))
}
