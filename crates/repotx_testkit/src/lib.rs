//! # repotx testkit
//!
//! Test utilities for repotx.
//!
//! This crate provides:
//! - Sample entities and identifiers, and a ready-made in-memory manager
//! - Property-based test generators using proptest
//! - A scripted repository that injects store failures and counts calls
//! - Log capture for asserting on `tracing` output
//!
//! ## Usage
//!
//! ```rust,ignore
//! use repotx_testkit::prelude::*;
//!
//! #[test]
//! fn saves_an_item() {
//!     let env = TestRepository::new();
//!     env.tx(|tx| tx.table::<Item>().save(item(1, 1, "a", Status::Ok)).map(drop))
//!         .unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod scripted;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::scripted::*;
    pub use repotx_core::{
        CoreError, CoreResult, Entity, Range, RepositoryTransaction, StdTxManager, Table, TxManager,
        TxOptions,
    };
    pub use repotx_memory::MemoryRepository;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use scripted::*;
