pub mod config;
pub mod error;

pub use config::{Environment, EnvironmentConfig, QuarryConfig};
pub use error::{QuarryError, Result};

/// Version stamped into every ledger entry.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default ledger table name.
pub const LEDGER_TABLE: &str = "quarry_metadata";

/// Filename token marking the migration that creates the target database.
pub const CREATE_DATABASE_TOKEN: &str = "Create-Database";

/// Ledger status code for a completed migration.
pub const STATUS_COMPLETE: i32 = 100;
