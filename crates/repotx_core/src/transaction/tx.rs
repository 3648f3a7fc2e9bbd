//! Attempt executor.
//!
//! A [`Tx`] runs the user body once against one store transaction, runs the
//! deferred callbacks the body registered and decides between commit and
//! rollback.

use super::local::TransactionLocal;
use super::name::TxName;
use super::options::TxOptions;
use super::repository::RepositoryTransaction;
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::table::Table;
use std::cell::RefCell;
use std::time::Instant;
use tracing::{debug, warn};

type BeforeCommit<'env, RT> = Box<dyn FnOnce(&Tx<'env, RT>) -> CoreResult<()> + 'env>;
type Deferred<'env> = Box<dyn FnOnce() + 'env>;

/// One transaction attempt, handed to the body by the transaction manager.
pub struct Tx<'env, RT: RepositoryTransaction> {
    name: TxName,
    transaction: RT,
    before_commit: RefCell<Vec<BeforeCommit<'env, RT>>>,
    after_commit: RefCell<Vec<Deferred<'env>>>,
    finally: RefCell<Vec<Deferred<'env>>>,
}

impl<'env, RT: RepositoryTransaction> Tx<'env, RT> {
    /// Wraps a freshly opened store transaction.
    pub fn new(name: TxName, transaction: RT) -> Self {
        Self {
            name,
            transaction,
            before_commit: RefCell::new(Vec::new()),
            after_commit: RefCell::new(Vec::new()),
            finally: RefCell::new(Vec::new()),
        }
    }

    /// Transaction name.
    pub fn name(&self) -> &TxName {
        &self.name
    }

    /// Options of this attempt.
    pub fn options(&self) -> &TxOptions {
        self.transaction.options()
    }

    /// Table of entity type `E`.
    pub fn table<E: Entity>(&self) -> Box<dyn Table<E> + '_> {
        self.transaction.table::<E>()
    }

    /// Per-attempt caches and log.
    pub fn transaction_local(&self) -> &TransactionLocal {
        self.transaction.transaction_local()
    }

    /// Underlying store transaction.
    pub fn repository_transaction(&self) -> &RT {
        &self.transaction
    }

    /// Runs `callback` after a successful commit. Never runs on rollback or
    /// in dry-run mode.
    pub fn defer(&self, callback: impl FnOnce() + 'env) {
        self.after_commit.borrow_mut().push(Box::new(callback));
    }

    /// Runs `callback` after the body succeeds, before commit. An error from
    /// the callback rolls the attempt back like an error from the body.
    pub fn defer_before_commit(&self, callback: impl FnOnce(&Self) -> CoreResult<()> + 'env) {
        self.before_commit.borrow_mut().push(Box::new(callback));
    }

    /// Runs `callback` once after the retry loop ends, whatever the outcome.
    /// Only callbacks registered by the last attempt run.
    pub fn defer_finally(&self, callback: impl FnOnce() + 'env) {
        self.finally.borrow_mut().push(Box::new(callback));
    }

    /// Whether commit was attempted on the store transaction.
    pub fn was_commit_attempted(&self) -> bool {
        self.transaction.was_commit_attempted()
    }

    pub(crate) fn run<T, F>(&self, body: &mut F) -> CoreResult<T>
    where
        F: FnMut(&Self) -> CoreResult<T>,
    {
        let started = Instant::now();
        let value = match body(self).and_then(|value| self.run_before_commit().map(|()| value)) {
            Ok(value) => value,
            Err(error) => {
                let error = self.rollback_after(error, started);
                return Err(error);
            }
        };

        if self.options().is_dry_run() {
            self.rollback_dry_run(started)?;
            return Ok(value);
        }

        if let Err(error) = self.transaction.commit() {
            debug!(
                elapsed = ?started.elapsed(),
                "runInTx(): Commit failed due to {error}{}",
                self.format_log("?! ")
            );
            return Err(error);
        }
        if self.options().log_statement_on_success() {
            debug!(elapsed = ?started.elapsed(), "runInTx(): Commit{}", self.format_log(""));
        }

        self.run_after_commit();
        Ok(value)
    }

    fn run_before_commit(&self) -> CoreResult<()> {
        loop {
            let batch = std::mem::take(&mut *self.before_commit.borrow_mut());
            if batch.is_empty() {
                return Ok(());
            }
            for callback in batch {
                callback(self)?;
            }
        }
    }

    fn run_after_commit(&self) {
        let callbacks = std::mem::take(&mut *self.after_commit.borrow_mut());
        for callback in callbacks {
            callback();
        }
    }

    pub(crate) fn run_finally(self) {
        for callback in self.finally.into_inner() {
            callback();
        }
    }

    /// Rolls back after a failed body; an optimistic lock raised by the
    /// rollback replaces a business error.
    fn rollback_after(&self, error: CoreError, started: Instant) -> CoreError {
        let business = error.kind() != ErrorKind::Interrupted;
        debug!(
            elapsed = ?started.elapsed(),
            "runInTx(): Rollback due to {error}{}",
            self.format_log("! ")
        );
        match self.transaction.rollback() {
            Ok(()) => error,
            Err(lock) if business && lock.kind() == ErrorKind::OptimisticLock => {
                debug!(
                    elapsed = ?started.elapsed(),
                    "runInTx(): Rollback as inconsistent with business error {error}"
                );
                lock
            }
            Err(rollback_error) => {
                warn!("runInTx(): Rollback failed: {rollback_error}");
                error
            }
        }
    }

    fn rollback_dry_run(&self, started: Instant) -> CoreResult<()> {
        match self.transaction.rollback() {
            Ok(()) => {
                debug!(
                    elapsed = ?started.elapsed(),
                    "runInTx(): Rollback due to dry-run mode{}",
                    self.format_log("# ")
                );
                Ok(())
            }
            Err(lock) if lock.kind() == ErrorKind::OptimisticLock => {
                debug!(
                    elapsed = ?started.elapsed(),
                    "runInTx(): Rollback because dry-run transaction read inconsistent data"
                );
                Err(lock)
            }
            Err(rollback_error) => {
                warn!("runInTx(): Dry-run rollback failed: {rollback_error}");
                Ok(())
            }
        }
    }

    fn format_log(&self, prefix: &str) -> String {
        let log = self.transaction_local().log();
        if log.is_empty() {
            String::new()
        } else {
            format!("\n{}", log.format(prefix))
        }
    }
}

impl<RT: RepositoryTransaction> std::fmt::Debug for Tx<'_, RT> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx")
            .field("name", &self.name)
            .field("options", self.options())
            .finish_non_exhaustive()
    }
}
