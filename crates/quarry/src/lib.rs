//! quarry - ledger-backed SQL migrations.
//!
//! Discovers `*.sql` migrations, runs the pending ones in filename order
//! through `psql`, and records each success in a ledger table inside the
//! target database.

pub mod cli;
pub mod logging;

pub use quarry_core::{Environment, EnvironmentConfig, QuarryConfig, QuarryError};
pub use quarry_runtime::migrations::{MigrationStatus, RunReport};
