//! In-memory repository.

use crate::error::{MemoryError, MemoryResult};
use crate::storage::Storage;
use crate::transaction::MemoryTransaction;
use parking_lot::{Mutex, RwLock};
use repotx_core::{CoreResult, Repository, TxOptions};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// A multi-version store kept in memory.
///
/// Suitable for tests and for running transaction code without a database.
/// Tables are created on first write.
///
/// # Example
///
/// ```rust,ignore
/// let repository = Arc::new(MemoryRepository::new());
/// let manager = StdTxManager::new(Arc::clone(&repository));
/// manager.tx(|tx| tx.table::<Account>().save(account.clone()))?;
/// ```
#[derive(Default)]
pub struct MemoryRepository {
    storage: RwLock<Arc<Mutex<Storage>>>,
    snapshots: Mutex<HashMap<Uuid, Storage>>,
    next_tx_id: AtomicU64,
}

impl MemoryRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commits that published writes.
    pub fn version(&self) -> u64 {
        self.storage.read().lock().version()
    }

    /// Names of the tables that have been written to, sorted.
    pub fn tables(&self) -> Vec<&'static str> {
        self.storage.read().lock().tables()
    }

    /// Saves a copy of the committed state and returns its id.
    pub fn make_snapshot(&self) -> Uuid {
        let snapshot = self.storage.read().lock().snapshot();
        let id = Uuid::new_v4();
        self.snapshots.lock().insert(id, snapshot);
        debug!(%id, "made in-memory snapshot");
        id
    }

    /// Replaces the current state with a copy of a snapshot.
    ///
    /// Transactions already open keep working on the replaced state.
    pub fn load_snapshot(&self, id: Uuid) -> MemoryResult<()> {
        let restored = self
            .snapshots
            .lock()
            .get(&id)
            .map(Storage::snapshot)
            .ok_or(MemoryError::SnapshotNotFound { id })?;
        *self.storage.write() = Arc::new(Mutex::new(restored));
        debug!(%id, "loaded in-memory snapshot");
        Ok(())
    }

    /// Forgets a snapshot. Loaded copies are unaffected.
    pub fn drop_snapshot(&self, id: Uuid) -> MemoryResult<()> {
        self.snapshots
            .lock()
            .remove(&id)
            .ok_or(MemoryError::SnapshotNotFound { id })?;
        debug!(%id, "dropped in-memory snapshot");
        Ok(())
    }
}

impl Repository for MemoryRepository {
    type Transaction = MemoryTransaction;

    fn start_transaction(&self, options: &TxOptions) -> CoreResult<MemoryTransaction> {
        let id = self.next_tx_id.fetch_add(1, Ordering::Relaxed) + 1;
        let storage = Arc::clone(&self.storage.read());
        Ok(MemoryTransaction::new(id, storage, options.clone()))
    }
}

impl std::fmt::Debug for MemoryRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRepository")
            .field("version", &self.version())
            .field("snapshots", &self.snapshots.lock().len())
            .finish()
    }
}
