use std::path::PathBuf;

use thiserror::Error;

/// Core error type for quarry operations.
#[derive(Error, Debug)]
pub enum QuarryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot list migration directory {}: {source}", path.display())]
    Discovery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration {migration} failed: {reason}")]
    Execution { migration: String, reason: String },

    #[error("Failed to record migration {migration} in ledger: {reason}")]
    Persistence { migration: String, reason: String },

    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration lock error: {0}")]
    Lock(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),
}

impl QuarryError {
    /// Whether this error comes from a migration that ran and failed, as
    /// opposed to a problem with configuration or infrastructure.
    pub fn is_migration_failure(&self) -> bool {
        matches!(self, QuarryError::Execution { .. })
    }
}

/// Result type alias using QuarryError.
pub type Result<T> = std::result::Result<T, QuarryError>;
