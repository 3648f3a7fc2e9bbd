//! Store transaction of the in-memory repository.

use crate::error::{MemoryError, MemoryResult};
use crate::lock::LockWatcher;
use crate::storage::{Row, Shard, Storage};
use crate::table::MemoryTable;
use parking_lot::Mutex;
use repotx_core::{
    CoreError, CoreResult, Entity, EntityIdSchema, IdCells, RepositoryTransaction, Table,
    TransactionLocal, TxOptions,
};
use std::any::TypeId;
use std::cell::{Cell, RefCell, RefMut};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

const COMMIT: &str = "commit()";
const ROLLBACK: &str = "rollback()";

/// What a queued write does to its row.
pub(crate) enum WriteKind {
    /// Fails if the row is visible.
    Insert {
        /// Debug rendering of the id, for the error.
        id: String,
        /// The new row.
        row: Row,
    },
    /// Inserts or replaces.
    Save(Row),
    /// Deletes if present.
    Delete,
}

/// A write, applied immediately or queued until commit.
pub(crate) struct PendingWrite {
    pub(crate) type_id: TypeId,
    pub(crate) table: &'static str,
    pub(crate) schema: Arc<EntityIdSchema>,
    pub(crate) cells: IdCells,
    pub(crate) kind: WriteKind,
}

impl PendingWrite {
    fn apply(self, storage: &mut Storage, tx_id: u64, version: u64) -> CoreResult<()> {
        let shard = storage.write_shard(tx_id, self.type_id, self.table, &self.schema);
        match self.kind {
            WriteKind::Insert { id, row } => {
                if shard.get(tx_id, version, &self.cells).is_some() {
                    return Err(CoreError::EntityAlreadyExists { id });
                }
                shard.put(tx_id, self.cells, row);
            }
            WriteKind::Save(row) => shard.put(tx_id, self.cells, row),
            WriteKind::Delete => shard.delete(tx_id, &self.cells),
        }
        Ok(())
    }
}

/// Short rendering of a statement result for the transaction log.
pub(crate) trait StatementResult {
    fn summary(&self) -> String;
}

impl StatementResult for () {
    fn summary(&self) -> String {
        "done".to_owned()
    }
}

impl<T: fmt::Debug> StatementResult for Option<T> {
    fn summary(&self) -> String {
        match self {
            Some(value) => format!("{value:?}"),
            None => "null".to_owned(),
        }
    }
}

impl<T: fmt::Debug> StatementResult for Vec<T> {
    fn summary(&self) -> String {
        match self.as_slice() {
            [single] => format!("{single:?}"),
            all => format!("[{}]", all.len()),
        }
    }
}

/// One attempt's transaction against a [`MemoryRepository`](crate::MemoryRepository).
///
/// Reads see the snapshot taken at the first statement plus the
/// transaction's own applied writes. Writes are queued until commit unless
/// the options request immediate writes. Commit fails with an optimistic
/// lock error if any row or range the transaction read was changed by a
/// transaction that committed after the snapshot.
pub struct MemoryTransaction {
    id: u64,
    storage: Arc<Mutex<Storage>>,
    options: TxOptions,
    local: TransactionLocal,
    watcher: RefCell<LockWatcher>,
    pending: RefCell<Vec<(String, PendingWrite)>>,
    version: Cell<Option<u64>>,
    has_writes: Cell<bool>,
    invalidated: Cell<bool>,
    closed_by: Cell<Option<&'static str>>,
    started: Instant,
}

impl MemoryTransaction {
    pub(crate) fn new(id: u64, storage: Arc<Mutex<Storage>>, options: TxOptions) -> Self {
        let local = TransactionLocal::new(&options);
        Self {
            id,
            storage,
            options,
            local,
            watcher: RefCell::new(LockWatcher::default()),
            pending: RefCell::new(Vec::new()),
            version: Cell::new(None),
            has_writes: Cell::new(false),
            invalidated: Cell::new(false),
            closed_by: Cell::new(None),
            started: Instant::now(),
        }
    }

    /// Transaction id, unique within the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Snapshot version, once the first statement has run.
    pub fn snapshot_version(&self) -> Option<u64> {
        self.version.get()
    }

    /// Number of writes queued until commit.
    pub fn pending_writes(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Returns true once a read failed with a lock conflict after the
    /// transaction had written.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated.get()
    }

    pub(crate) fn watcher(&self) -> RefMut<'_, LockWatcher> {
        self.watcher.borrow_mut()
    }

    fn version_at(&self, storage: &Storage) -> u64 {
        match self.version.get() {
            Some(version) => version,
            None => {
                let version = storage.version();
                self.version.set(Some(version));
                version
            }
        }
    }

    fn ensure_active(&self) -> MemoryResult<()> {
        match self.closed_by.get() {
            Some(action) => Err(MemoryError::Closed { action }),
            None => Ok(()),
        }
    }

    fn ensure_mutable(&self) -> MemoryResult<()> {
        const OPERATION: &str = "Mutable operations";
        if self.options.is_scan() {
            return Err(MemoryError::MutationInScan {
                operation: OPERATION,
            });
        }
        if self.options.is_read_only() {
            return Err(MemoryError::MutationInReadOnly {
                operation: OPERATION,
                level: self.options.isolation_level(),
            });
        }
        Ok(())
    }

    /// Fails a scan that returned more rows than allowed.
    pub(crate) fn check_scan_size(&self, table: &'static str, rows: usize) -> MemoryResult<()> {
        if let Some(scan) = self.options.scan_options() {
            if rows as u64 > scan.max_size {
                return Err(MemoryError::ScanTooLarge {
                    table,
                    max_size: scan.max_size,
                });
            }
        }
        Ok(())
    }

    /// Runs a read against the shard of `type_id`.
    ///
    /// Once the transaction has written, every read re-checks its locks; a
    /// conflict invalidates the transaction.
    pub(crate) fn read<R, F>(&self, action: &str, type_id: TypeId, read: F) -> CoreResult<R>
    where
        R: StatementResult,
        F: FnOnce(Option<&Shard>, u64, u64) -> CoreResult<R>,
    {
        self.ensure_active()?;
        self.log_statement(action, || {
            let storage = self.storage.lock();
            let version = self.version_at(&storage);
            let shard = storage.shard(type_id);
            if let (Some(shard), true) = (shard, self.has_writes.get()) {
                if let Err(conflict) = shard.check_locks(type_id, version, &self.watcher.borrow()) {
                    self.invalidated.set(true);
                    return Err(conflict.into());
                }
            }
            read(shard, self.id, version)
        })
    }

    /// Applies or queues a write.
    pub(crate) fn write(&self, action: String, write: PendingWrite) -> CoreResult<()> {
        self.ensure_active()?;
        self.ensure_mutable()?;
        if self.options.is_immediate_writes() {
            self.apply(&action, write)
        } else {
            self.pending.borrow_mut().push((action, write));
            Ok(())
        }
    }

    fn apply(&self, action: &str, write: PendingWrite) -> CoreResult<()> {
        self.log_statement(action, || {
            let mut storage = self.storage.lock();
            let version = self.version_at(&storage);
            write.apply(&mut storage, self.id, version)?;
            self.has_writes.set(true);
            Ok(())
        })
    }

    fn log_statement<R, F>(&self, action: &str, statement: F) -> CoreResult<R>
    where
        R: StatementResult,
        F: FnOnce() -> CoreResult<R>,
    {
        let started = Instant::now();
        let result = statement();
        let line = match &result {
            Ok(value) => format!("[ {:?} ] {action} -> {}", started.elapsed(), value.summary()),
            Err(error) => format!("[ {:?} ] {action} => {error}", started.elapsed()),
        };
        trace!(tx = self.id, "{line}");
        self.local.log().debug(line);
        result
    }

    fn end_transaction<F>(&self, action: &'static str, finish: F) -> CoreResult<()>
    where
        F: FnOnce() -> CoreResult<()>,
    {
        self.ensure_active()?;
        let result = if self.is_final_action_needed(action) {
            self.log_statement(action, finish)
        } else {
            Ok(())
        };
        self.closed_by.set(Some(action));
        self.local
            .log()
            .info(format!("[[{:?}]] TOTAL (since tx start)", self.started.elapsed()));
        result
    }

    fn is_final_action_needed(&self, action: &str) -> bool {
        if self.options.is_scan() {
            self.local.log().info(format!("No-op {action}: scan tx"));
            return false;
        }
        if self.options.is_read_only() {
            self.local.log().info(format!(
                "No-op {action}: read-only tx @{}",
                self.options.isolation_level()
            ));
            return false;
        }
        true
    }

    fn commit_writes(&self) -> CoreResult<()> {
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        let result = pending
            .into_iter()
            .try_for_each(|(action, write)| self.apply(&action, write))
            .and_then(|()| {
                let mut storage = self.storage.lock();
                let version = self.version_at(&storage);
                storage
                    .commit(self.id, version, &self.watcher.borrow())
                    .map_err(CoreError::from)
            });
        if result.is_err() {
            self.storage.lock().rollback(self.id);
        }
        result
    }
}

impl RepositoryTransaction for MemoryTransaction {
    fn options(&self) -> &TxOptions {
        &self.options
    }

    fn transaction_local(&self) -> &TransactionLocal {
        &self.local
    }

    fn table<E: Entity>(&self) -> Box<dyn Table<E> + '_> {
        Box::new(MemoryTable::<E>::new(self))
    }

    fn commit(&self) -> CoreResult<()> {
        if self.invalidated.get() {
            return Err(MemoryError::Invalidated.into());
        }
        self.end_transaction(COMMIT, || self.commit_writes())
    }

    fn rollback(&self) -> CoreResult<()> {
        self.end_transaction(ROLLBACK, || {
            self.pending.borrow_mut().clear();
            self.storage.lock().rollback(self.id);
            Ok(())
        })
    }

    fn was_commit_attempted(&self) -> bool {
        self.closed_by.get() == Some(COMMIT)
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.closed_by.get().is_none() {
            self.storage.lock().rollback(self.id);
        }
    }
}

impl fmt::Debug for MemoryTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransaction")
            .field("id", &self.id)
            .field("options", &self.options)
            .field("version", &self.version.get())
            .field("closed_by", &self.closed_by.get())
            .finish_non_exhaustive()
    }
}
