//! # repotx memory
//!
//! In-memory store driver for repotx.
//!
//! [`MemoryRepository`] keeps every committed version of every row and
//! checks, at commit, that nothing a transaction read has changed since its
//! snapshot. Conflicts surface as optimistic lock errors, which the
//! transaction manager retries.
//!
//! ## Example
//!
//! ```rust,ignore
//! use repotx_core::{StdTxManager, TxManager};
//! use repotx_memory::MemoryRepository;
//!
//! let manager = StdTxManager::new(Arc::new(MemoryRepository::new()));
//! let found = manager.tx(|tx| tx.table::<Account>().find(&id))?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod lock;
mod repository;
mod storage;
mod table;
mod transaction;

pub use error::{MemoryError, MemoryResult};
pub use repository::MemoryRepository;
pub use table::MemoryTable;
pub use transaction::MemoryTransaction;
