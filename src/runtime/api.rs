//! API-facing health model.

use serde::{Deserialize, Serialize};

use crate::core::{BrowserPool, PoolArbitrator, PoolStats, PoolStatus, WorkerSnapshot};

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Running, and neither loop has died.
    pub ok: bool,
    /// Pool lifecycle status.
    pub status: PoolStatus,
    /// Panic message of whichever loop died, dispatch first.
    pub loop_fault: Option<String>,
    /// Pool counters.
    pub stats: PoolStats,
    /// Roster snapshot.
    pub workers: Vec<WorkerSnapshot>,
}

/// Build a health snapshot of a pool and its arbitrator.
pub fn health<H>(pool: &BrowserPool<H>, arbitrator: &PoolArbitrator<H>) -> Health
where
    H: Send + Sync + 'static,
{
    let status = pool.status();
    let loop_fault = pool.loop_fault().or_else(|| arbitrator.loop_fault());
    Health {
        ok: status == PoolStatus::Running && loop_fault.is_none(),
        status,
        loop_fault,
        stats: pool.stats(),
        workers: arbitrator.workers(),
    }
}
