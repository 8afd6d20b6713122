pub mod db;
pub mod migrations;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use migrations::{
    EngineExecutor, Ledger, MigrationLock, Orchestrator, PgLedger, RunReport, ScriptRunner,
};
