//! Fault injection around a real repository.
//!
//! [`ScriptedRepository`] wraps another [`Repository`] and lets a test queue
//! failures for upcoming transaction starts, commits and rollbacks, while
//! counting every call.

use parking_lot::Mutex;
use repotx_core::{
    CoreError, CoreResult, Entity, Repository, RepositoryTransaction, Table, TransactionLocal,
    TxOptions,
};
use repotx_memory::MemoryRepository;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Call counts of a [`ScriptedRepository`].
#[derive(Debug, Default)]
pub struct CallCounters {
    started: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl CallCounters {
    /// Transactions started, including scripted start failures.
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Commit calls.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Rollback calls.
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct Script {
    start: VecDeque<CoreError>,
    commit: VecDeque<CoreError>,
    rollback: VecDeque<CoreError>,
}

/// A repository whose next calls can be made to fail.
#[derive(Debug)]
pub struct ScriptedRepository<R = MemoryRepository> {
    inner: R,
    script: Mutex<Script>,
    counters: Arc<CallCounters>,
}

impl ScriptedRepository<MemoryRepository> {
    /// Wraps an empty in-memory repository.
    pub fn in_memory() -> Self {
        Self::new(MemoryRepository::new())
    }
}

impl<R: Repository> ScriptedRepository<R> {
    /// Wraps `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            script: Mutex::new(Script::default()),
            counters: Arc::new(CallCounters::default()),
        }
    }

    /// The wrapped repository.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Call counts.
    pub fn counters(&self) -> &CallCounters {
        &self.counters
    }

    /// Makes the next `start_transaction` fail with `error`.
    pub fn fail_next_start(&self, error: CoreError) -> &Self {
        self.script.lock().start.push_back(error);
        self
    }

    /// Makes the commit of the next started transaction fail with `error`.
    pub fn fail_next_commit(&self, error: CoreError) -> &Self {
        self.script.lock().commit.push_back(error);
        self
    }

    /// Makes the rollback of the next started transaction fail with `error`.
    pub fn fail_next_rollback(&self, error: CoreError) -> &Self {
        self.script.lock().rollback.push_back(error);
        self
    }
}

impl<R: Repository> Repository for ScriptedRepository<R> {
    type Transaction = ScriptedTransaction<R::Transaction>;

    fn start_transaction(&self, options: &TxOptions) -> CoreResult<Self::Transaction> {
        self.counters.started.fetch_add(1, Ordering::Relaxed);
        let (commit_failure, rollback_failure) = {
            let mut script = self.script.lock();
            if let Some(error) = script.start.pop_front() {
                return Err(error);
            }
            (script.commit.pop_front(), script.rollback.pop_front())
        };
        Ok(ScriptedTransaction {
            inner: self.inner.start_transaction(options)?,
            commit_failure: RefCell::new(commit_failure),
            rollback_failure: RefCell::new(rollback_failure),
            commit_attempted: Cell::new(false),
            counters: Arc::clone(&self.counters),
        })
    }
}

/// Transaction of a [`ScriptedRepository`].
#[derive(Debug)]
pub struct ScriptedTransaction<T> {
    inner: T,
    commit_failure: RefCell<Option<CoreError>>,
    rollback_failure: RefCell<Option<CoreError>>,
    commit_attempted: Cell<bool>,
    counters: Arc<CallCounters>,
}

impl<T: RepositoryTransaction> ScriptedTransaction<T> {
    /// The wrapped transaction.
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: RepositoryTransaction> RepositoryTransaction for ScriptedTransaction<T> {
    fn options(&self) -> &TxOptions {
        self.inner.options()
    }

    fn transaction_local(&self) -> &TransactionLocal {
        self.inner.transaction_local()
    }

    fn table<E: Entity>(&self) -> Box<dyn Table<E> + '_> {
        self.inner.table::<E>()
    }

    /// A scripted failure rolls the inner transaction back, so nothing is
    /// published.
    fn commit(&self) -> CoreResult<()> {
        self.counters.commits.fetch_add(1, Ordering::Relaxed);
        self.commit_attempted.set(true);
        match self.commit_failure.borrow_mut().take() {
            Some(error) => {
                let _ = self.inner.rollback();
                Err(error)
            }
            None => self.inner.commit(),
        }
    }

    fn rollback(&self) -> CoreResult<()> {
        self.counters.rollbacks.fetch_add(1, Ordering::Relaxed);
        self.inner.rollback()?;
        match self.rollback_failure.borrow_mut().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn was_commit_attempted(&self) -> bool {
        self.commit_attempted.get() || self.inner.was_commit_attempted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{account, Account, AccountId};
    use repotx_core::ErrorKind;

    #[test]
    fn scripted_commit_failure_publishes_nothing() {
        let repository = ScriptedRepository::in_memory();
        repository.fail_next_commit(CoreError::optimistic_lock("scripted"));

        let tx = repository.start_transaction(&TxOptions::default()).unwrap();
        tx.table::<Account>().save(account("a", "ann", 1)).unwrap();
        let error = tx.commit().unwrap_err();

        assert_eq!(error.kind(), ErrorKind::OptimisticLock);
        assert!(tx.was_commit_attempted());
        assert_eq!(repository.inner().version(), 0);

        let tx = repository.start_transaction(&TxOptions::default()).unwrap();
        assert!(tx.table::<Account>().find(&AccountId("a".into())).unwrap().is_none());
        assert_eq!(repository.counters().started(), 2);
        assert_eq!(repository.counters().commits(), 1);
    }

    #[test]
    fn scripted_start_failure() {
        let repository = ScriptedRepository::in_memory();
        repository.fail_next_start(CoreError::invalid_operation("store down"));

        assert!(repository.start_transaction(&TxOptions::default()).is_err());
        assert!(repository.start_transaction(&TxOptions::default()).is_ok());
    }
}
