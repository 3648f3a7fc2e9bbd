//! Transactions with retries.
//!
//! - [`TxManager`] / [`StdTxManager`]: configuration and the retry loop
//! - [`Tx`]: one attempt with its deferred callbacks
//! - [`Repository`] / [`RepositoryTransaction`]: what a store driver provides
//! - [`TransactionLocal`]: per-attempt caches and log

mod local;
mod log;
mod manager;
mod name;
mod options;
mod repository;
mod tx;

pub use local::TransactionLocal;
pub use log::TransactionLog;
pub use manager::{
    format_tx_id, in_transaction, ReadOnlyBuilder, ScanBuilder, SeparatePolicy, StdTxManager,
    TxManager, TxManagerState, DEFAULT_MAX_ATTEMPTS,
};
pub use name::{TxName, TxNameGenerator};
pub use options::{
    ConditionalRetryMode, IsolationLevel, LogLevel, RetryOptions, ScanOptions, TimeoutOptions,
    TxOptions, WriteMode,
};
pub use repository::{Repository, RepositoryTransaction};
pub use tx::Tx;
