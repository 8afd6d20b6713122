mod discovery;
mod executor;
mod ledger;
mod lock;
mod orchestrator;

pub use discovery::{discover, MigrationFile};
pub use executor::{
    classify, target_database, EngineExecutor, ExecutionOutcome, ExecutionStatus, ScriptRunner,
};
pub use ledger::{Ledger, LedgerState, PgLedger};
pub use lock::{lock_key, MigrationLock};
pub use orchestrator::{
    pending, MigrationFailure, MigrationStatus, Orchestrator, RunReport, RunState,
};
