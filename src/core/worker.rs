//! Worker wrapper: one browser session plus its scheduling state.
//!
//! State machine: `Created → Idle ⇄ Busy → Idle | Retiring → Evicted`.
//! The busy flag is the only mutual exclusion around the session; it is taken
//! with a compare-and-swap so a claim and the flag flip are one step.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::util::clock::duration_ms;
use crate::util::serde::{new_id, WorkerId};

/// A browser session owned by the pool, with busy/retirement bookkeeping.
pub struct BrowserWorker<H> {
    id: WorkerId,
    browser: Mutex<Option<H>>,
    max_idle_ms: u64,
    busy: AtomicBool,
    retiring: AtomicBool,
    evicted: AtomicBool,
    fails: AtomicU32,
    last_job_ms: AtomicU64,
    last_health_ms: AtomicU64,
}

/// Point-in-time view of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    /// Worker identifier.
    pub id: WorkerId,
    /// Whether a job currently holds the worker.
    pub busy: bool,
    /// Whether the worker is tagged for retirement.
    pub retiring: bool,
    /// Failures recorded so far.
    pub fails: u32,
    /// Idle threshold of this worker in milliseconds.
    pub max_idle_ms: u64,
    /// Completion time of the last standard job.
    pub last_job_ms: u64,
    /// Completion time of the last health check.
    pub last_health_ms: u64,
}

impl<H> BrowserWorker<H> {
    /// Wrap a freshly created session.
    pub fn new(browser: H, max_idle: Duration, created_at_ms: u64) -> Self {
        Self {
            id: new_id(),
            browser: Mutex::new(Some(browser)),
            max_idle_ms: duration_ms(max_idle),
            busy: AtomicBool::new(false),
            retiring: AtomicBool::new(false),
            evicted: AtomicBool::new(false),
            fails: AtomicU32::new(0),
            last_job_ms: AtomicU64::new(created_at_ms),
            last_health_ms: AtomicU64::new(created_at_ms),
        }
    }

    /// Worker identifier.
    pub const fn id(&self) -> WorkerId {
        self.id
    }

    /// Idle time after which the worker may be retired.
    pub const fn max_idle(&self) -> Duration {
        Duration::from_millis(self.max_idle_ms)
    }

    /// Whether a job currently holds the worker.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Whether the worker is tagged for retirement.
    pub fn is_retiring(&self) -> bool {
        self.retiring.load(Ordering::Acquire)
    }

    /// Failures recorded so far.
    pub fn fails(&self) -> u32 {
        self.fails.load(Ordering::Acquire)
    }

    /// Completion time of the last standard job (creation time initially).
    pub fn last_job_ms(&self) -> u64 {
        self.last_job_ms.load(Ordering::Acquire)
    }

    /// Completion time of the last health check (creation time initially).
    pub fn last_health_ms(&self) -> u64 {
        self.last_health_ms.load(Ordering::Acquire)
    }

    /// Milliseconds by which the idle time at `now_ms` exceeds the worker's
    /// threshold, `None` while still within it.
    pub fn idle_overrun_ms(&self, now_ms: u64) -> Option<u64> {
        let idle = now_ms.saturating_sub(self.last_job_ms());
        (idle > self.max_idle_ms).then(|| idle - self.max_idle_ms)
    }

    /// Point-in-time view.
    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id,
            busy: self.is_busy(),
            retiring: self.is_retiring(),
            fails: self.fails(),
            max_idle_ms: self.max_idle_ms,
            last_job_ms: self.last_job_ms(),
            last_health_ms: self.last_health_ms(),
        }
    }

    /// Flip the busy flag from `false` to `true`. Returns `false` if another
    /// holder already owns the worker.
    pub(crate) fn try_claim(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_claim(&self) {
        self.busy.store(false, Ordering::Release);
    }

    /// Returns `true` if this call performed the tagging.
    pub(crate) fn tag_for_retirement(&self) -> bool {
        !self.retiring.swap(true, Ordering::AcqRel)
    }

    /// Returns the new failure count.
    pub(crate) fn record_failure(&self) -> u32 {
        self.fails.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn record_job(&self, now_ms: u64) {
        self.last_job_ms.store(now_ms, Ordering::Release);
    }

    pub(crate) fn record_health(&self, now_ms: u64) {
        self.last_health_ms.store(now_ms, Ordering::Release);
    }

    pub(crate) fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }

    pub(crate) const fn browser(&self) -> &Mutex<Option<H>> {
        &self.browser
    }

    /// Detach the session for release. Waits for an in-flight job to let go
    /// of it; afterwards the worker is never handed out again.
    pub(crate) async fn take_browser(&self) -> Option<H> {
        self.evicted.store(true, Ordering::Release);
        self.browser.lock().await.take()
    }
}

impl<H> fmt::Debug for BrowserWorker<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowserWorker")
            .field("id", &self.id)
            .field("busy", &self.is_busy())
            .field("retiring", &self.is_retiring())
            .field("fails", &self.fails())
            .finish_non_exhaustive()
    }
}
