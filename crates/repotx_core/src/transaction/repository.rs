//! Contracts of the store driver.

use super::local::TransactionLocal;
use super::options::TxOptions;
use crate::entity::Entity;
use crate::error::CoreResult;
use crate::table::Table;

/// A store that opens transactions.
pub trait Repository: Send + Sync {
    /// Transaction type of this store.
    type Transaction: RepositoryTransaction;

    /// Opens a new store transaction for one attempt.
    fn start_transaction(&self, options: &TxOptions) -> CoreResult<Self::Transaction>;
}

/// One store transaction, used by exactly one attempt.
///
/// After `commit` or `rollback` the transaction is closed; any further use is
/// an error.
pub trait RepositoryTransaction {
    /// Options the transaction was opened with.
    fn options(&self) -> &TxOptions;

    /// Per-attempt state: caches and log.
    fn transaction_local(&self) -> &TransactionLocal;

    /// Table of entity type `E`.
    fn table<E: Entity>(&self) -> Box<dyn Table<E> + '_>;

    /// Commits; fails with an optimistic lock error when a concurrent writer
    /// invalidated the data read or written.
    fn commit(&self) -> CoreResult<()>;

    /// Rolls back. May fail with an optimistic lock error if the data read
    /// is known to be inconsistent.
    fn rollback(&self) -> CoreResult<()>;

    /// Whether `commit` was called, successfully or not.
    fn was_commit_attempted(&self) -> bool;
}
