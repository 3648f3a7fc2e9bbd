//! Error types for the in-memory store.

use repotx_core::{CoreError, IsolationLevel};
use thiserror::Error;
use uuid::Uuid;

/// Result type for in-memory store operations.
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Errors raised by the in-memory store.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// A row read by the transaction was changed by a later commit.
    #[error("Row lock failed {row}")]
    RowLockFailed {
        /// Table and key of the row.
        row: String,
    },

    /// A range read by the transaction gained, lost or changed a row.
    #[error("Table lock failed {table}")]
    TableLockFailed {
        /// Table name.
        table: &'static str,
    },

    /// A read inside the transaction already failed with a lock conflict.
    #[error("Transaction was invalidated. Commit isn't possible")]
    Invalidated,

    /// The transaction was used after commit or rollback.
    #[error("Transaction already closed by {action}")]
    Closed {
        /// `commit()` or `rollback()`.
        action: &'static str,
    },

    /// A write was attempted in a scan transaction.
    #[error("{operation} are not allowed in scan transactions")]
    MutationInScan {
        /// Rejected operation.
        operation: &'static str,
    },

    /// A write was attempted in a read-only transaction.
    #[error("{operation} are not allowed at isolation level {level}")]
    MutationInReadOnly {
        /// Rejected operation.
        operation: &'static str,
        /// Isolation level of the transaction.
        level: IsolationLevel,
    },

    /// A scan read more rows than its options allow.
    #[error("scan of {table} returned more than {max_size} rows")]
    ScanTooLarge {
        /// Table name.
        table: &'static str,
        /// Configured limit.
        max_size: u64,
    },

    /// A stored row does not hold the entity type of its table.
    #[error("row of {table} holds a different entity type")]
    TypeMismatch {
        /// Table name.
        table: &'static str,
    },

    /// No snapshot with this id was made.
    #[error("snapshot {id} not found")]
    SnapshotNotFound {
        /// Snapshot id.
        id: Uuid,
    },
}

impl MemoryError {
    /// Returns true for lock conflicts.
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, Self::RowLockFailed { .. } | Self::TableLockFailed { .. })
    }
}

impl From<MemoryError> for CoreError {
    fn from(error: MemoryError) -> Self {
        match error {
            MemoryError::RowLockFailed { .. } | MemoryError::TableLockFailed { .. } => {
                CoreError::optimistic_lock(error.to_string())
            }
            MemoryError::SnapshotNotFound { .. } => CoreError::invalid_argument(error.to_string()),
            _ => CoreError::invalid_operation(error.to_string()),
        }
    }
}
