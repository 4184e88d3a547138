//! Pool counters and their snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Statistics about pool throughput and outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Commands waiting in memory.
    pub queued_commands: usize,
    /// Workers waiting for a command.
    pub idle_workers: usize,
    /// Commands accepted by `submit`.
    pub submitted: u64,
    /// Standard commands that ran to success.
    pub completed: u64,
    /// Standard command attempts that failed.
    pub failed: u64,
    /// Commands put back at the end of the queue.
    pub requeued: u64,
    /// Commands handed to the state provider for later processing.
    pub persisted: u64,
    /// Commands moved to the problem sink.
    pub problems: u64,
    /// Commands the state provider could not store.
    pub dropped: u64,
    /// Health checks executed.
    pub health_checks: u64,
    /// Health checks that failed.
    pub health_check_failures: u64,
    /// Workers found busy at claim time.
    pub consistency_faults: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub requeued: AtomicU64,
    pub persisted: AtomicU64,
    pub problems: AtomicU64,
    pub dropped: AtomicU64,
    pub health_checks: AtomicU64,
    pub health_check_failures: AtomicU64,
    pub consistency_faults: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current statistics.
    pub(crate) fn snapshot(&self, queued_commands: usize, idle_workers: usize) -> PoolStats {
        PoolStats {
            queued_commands,
            idle_workers,
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            problems: self.problems.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            health_checks: self.health_checks.load(Ordering::Relaxed),
            health_check_failures: self.health_check_failures.load(Ordering::Relaxed),
            consistency_faults: self.consistency_faults.load(Ordering::Relaxed),
        }
    }
}
