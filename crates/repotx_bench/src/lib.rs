//! Benchmarks for repotx.
//!
//! The benchmarks live under `benches/`; this crate only shares data
//! generators between them.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod utils;
