//! Transaction statistics.
//!
//! Counters are shared by a transaction manager and every manager derived
//! from it.
//!
//! # Usage
//!
//! ```rust,ignore
//! let manager = StdTxManager::new(repository);
//! manager.tx(|tx| { /* ... */ Ok(()) })?;
//!
//! let stats = manager.stats().snapshot();
//! println!("commits: {}", stats.commits);
//! println!("retries: {:?}", stats.retries);
//! ```

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Transaction outcome and latency counters.
///
/// All counters are atomic and can be read while transactions are running.
#[derive(Debug, Default)]
pub struct TxStats {
    /// Attempts started.
    attempts: AtomicU64,
    /// `tx()` calls that committed.
    commits: AtomicU64,
    /// `tx()` calls that ended in a rollback (failures and dry-runs).
    rollbacks: AtomicU64,
    /// `tx()` calls run in dry-run mode.
    dry_runs: AtomicU64,
    /// `tx()` calls that exhausted their attempts.
    fails: AtomicU64,
    /// Retries by failure reason.
    retries: Mutex<BTreeMap<String, u64>>,
    /// Latency of single attempts.
    attempt_latency: Latency,
    /// Latency of whole `tx()` calls.
    total_latency: Latency,
}

#[derive(Debug, Default)]
struct Latency {
    count: AtomicU64,
    total_nanos: AtomicU64,
    max_nanos: AtomicU64,
}

impl Latency {
    fn observe(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            count: self.count.load(Ordering::Relaxed),
            total: Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed)),
            max: Duration::from_nanos(self.max_nanos.load(Ordering::Relaxed)),
        }
    }
}

/// Point-in-time latency summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LatencySnapshot {
    /// Number of observations.
    pub count: u64,
    /// Sum of all observations.
    pub total: Duration,
    /// Largest observation.
    pub max: Duration,
}

/// Point-in-time copy of [`TxStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TxStatsSnapshot {
    /// Attempts started.
    pub attempts: u64,
    /// `tx()` calls that committed.
    pub commits: u64,
    /// `tx()` calls that ended in a rollback.
    pub rollbacks: u64,
    /// `tx()` calls run in dry-run mode.
    pub dry_runs: u64,
    /// `tx()` calls that exhausted their attempts.
    pub fails: u64,
    /// Retries by failure reason.
    pub retries: BTreeMap<String, u64>,
    /// Latency of single attempts.
    pub attempt_latency: LatencySnapshot,
    /// Latency of whole `tx()` calls.
    pub total_latency: LatencySnapshot,
}

impl TxStatsSnapshot {
    /// Total retries across all reasons.
    pub fn total_retries(&self) -> u64 {
        self.retries.values().sum()
    }
}

impl TxStats {
    /// Creates zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_attempt(&self, elapsed: Duration) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.attempt_latency.observe(elapsed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dry_run(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
        self.dry_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fail(&self) {
        self.fails.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self, reason: &str) {
        *self.retries.lock().entry(reason.to_owned()).or_insert(0) += 1;
    }

    pub(crate) fn record_total(&self, elapsed: Duration) {
        self.total_latency.observe(elapsed);
    }

    /// Returns the number of attempts started.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Returns the number of committed `tx()` calls.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Returns the number of rolled back `tx()` calls.
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    /// Returns the number of dry-run `tx()` calls.
    pub fn dry_runs(&self) -> u64 {
        self.dry_runs.load(Ordering::Relaxed)
    }

    /// Returns the number of `tx()` calls that exhausted their attempts.
    pub fn fails(&self) -> u64 {
        self.fails.load(Ordering::Relaxed)
    }

    /// Returns the number of retries caused by `reason`.
    pub fn retries(&self, reason: &str) -> u64 {
        self.retries.lock().get(reason).copied().unwrap_or(0)
    }

    /// Copies all counters.
    pub fn snapshot(&self) -> TxStatsSnapshot {
        TxStatsSnapshot {
            attempts: self.attempts(),
            commits: self.commits(),
            rollbacks: self.rollbacks(),
            dry_runs: self.dry_runs(),
            fails: self.fails(),
            retries: self.retries.lock().clone(),
            attempt_latency: self.attempt_latency.snapshot(),
            total_latency: self.total_latency.snapshot(),
        }
    }
}
