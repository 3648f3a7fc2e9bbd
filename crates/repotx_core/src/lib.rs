//! # repotx core
//!
//! Transactional data access over an abstract row store.
//!
//! This crate provides:
//! - A transaction manager that retries transient failures with backoff
//! - Per-attempt callbacks that run before commit, after commit and finally
//! - A first-level cache that merges with store reads in [`find_by_ids`]
//! - Typed entity identifiers flattened into ordered field cells
//! - Identifier ranges built from a minimum and a maximum identifier
//!
//! Store drivers implement [`Repository`] and [`RepositoryTransaction`];
//! application code talks to a [`TxManager`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod cancel;
mod entity;
mod error;
mod range;
mod retry;
mod schema;
mod stats;
mod table;
mod transaction;

pub use cache::{find_by_ids, CacheLookup, FirstLevelCache};
pub use cancel::CancellationToken;
pub use entity::{sort_by_id, Entity};
pub use error::{BoxError, CoreError, CoreResult, ErrorKind};
pub use range::Range;
pub use retry::RetryPolicy;
pub use schema::{
    compare_cells, matches_prefix, EntityId, EntityIdSchema, FieldKind, IdCells, IdField, IdNode,
    IdShape, IdValue,
};
pub use stats::{LatencySnapshot, TxStats, TxStatsSnapshot};
pub use table::Table;
pub use transaction::{
    format_tx_id, in_transaction, ConditionalRetryMode, IsolationLevel, LogLevel, ReadOnlyBuilder,
    Repository, RepositoryTransaction, RetryOptions, ScanBuilder, ScanOptions, SeparatePolicy,
    StdTxManager, TimeoutOptions, TransactionLocal, TransactionLog, Tx, TxManager,
    TxManagerState, TxName, TxNameGenerator, TxOptions, WriteMode, DEFAULT_MAX_ATTEMPTS,
};
