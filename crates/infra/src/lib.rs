//! Infrastructure layer: configuration, Postgres wiring, the isolated
//! transaction executor, ledger storage, and recalculation.

pub mod config;
pub mod db;
pub mod executor;
pub mod ledger_store;
pub mod recalculation;

pub use config::LedgerConfig;
pub use executor::{ExecutorError, IsolatedExecutor, RetryPolicy};
pub use ledger_store::{InMemoryLedgerStore, LedgerStore, LedgerStoreError, PostgresLedgerStore};
pub use recalculation::{
    LedgerMutation, LocationScope, RecalcError, RecalculatedBucket, Recalculator,
};
