//! Pool counters
//!
//! Lock-free counters updated by the worker loops and by `submit`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Live counters of one worker pool
#[derive(Debug, Default)]
pub struct PoolStats {
    submitted: AtomicU64,
    rejected: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    retried: AtomicU64,
    executing: AtomicUsize,
    peak_executing: AtomicUsize,
}

/// Point-in-time copy of [`PoolStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatsSnapshot {
    pub submitted: u64,
    pub rejected: u64,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub retried: u64,
    /// Items holding a permit right now
    pub executing: usize,
    /// Highest `executing` ever observed
    pub peak_executing: usize,
}

impl PoolStatsSnapshot {
    /// Items that reached a terminal outcome
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }
}

impl PoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Record that an item acquired a permit
    pub(crate) fn task_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
        let executing = self.executing.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_executing.fetch_max(executing, Ordering::SeqCst);
    }

    /// Record that an item released its permit
    pub(crate) fn task_finished(&self) {
        self.executing.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Items holding a permit right now
    pub fn executing(&self) -> usize {
        self.executing.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            executing: self.executing.load(Ordering::SeqCst),
            peak_executing: self.peak_executing.load(Ordering::SeqCst),
        }
    }
}
