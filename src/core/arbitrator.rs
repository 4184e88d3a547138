//! Pool arbitrator: owns the worker roster and runs the control loop that
//! evicts, tags, health-checks and scales workers.
//!
//! One control tick does, in order:
//!
//! 1. evict at most one non-busy worker tagged for retirement,
//! 2. tag the idle worker furthest past its own idle threshold,
//! 3. send one health check to the least recently checked idle worker,
//! 4. start one new worker in the background when the backlog calls for it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PoolSettings;
use crate::core::{
    BrowserCommand, BrowserFactory, BrowserPool, BrowserWorker, Command, Dependencies, PoolError,
    WorkerSnapshot,
};
use crate::runtime::{LoopFault, TokioSpawner};
use crate::util::clock::{duration_ms, Clock};
use crate::util::serde::WorkerId;

/// What a single control tick decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickOutcome {
    /// Worker removed from the roster and released.
    pub evicted: Option<WorkerId>,
    /// Worker tagged for retirement.
    pub tagged: Option<WorkerId>,
    /// Worker a health check was dispatched to.
    pub health_checked: Option<WorkerId>,
    /// Whether a background scale-up was launched.
    pub scaling_up: bool,
}

/// Health-check logic: asks the factory to probe the session.
struct FactoryProbe<H> {
    factory: Arc<dyn BrowserFactory<H>>,
}

#[async_trait]
impl<H> BrowserCommand<H> for FactoryProbe<H>
where
    H: Send + Sync + 'static,
{
    async fn execute(
        &self,
        browser: &H,
        _cancel: &CancellationToken,
        _deps: &Dependencies,
        _run_number: u32,
    ) -> anyhow::Result<()> {
        self.factory.probe(browser).await
    }

    fn kind(&self) -> &str {
        "health-check"
    }
}

struct ArbitratorInner<H> {
    settings: PoolSettings,
    pool: BrowserPool<H>,
    factory: Arc<dyn BrowserFactory<H>>,
    clock: Arc<dyn Clock>,
    spawner: TokioSpawner,
    roster: Mutex<Vec<Arc<BrowserWorker<H>>>>,
    scaling: AtomicBool,
    stop: Mutex<CancellationToken>,
    fault: Arc<LoopFault>,
    probe: Arc<dyn BrowserCommand<H>>,
}

/// Sole creator and destroyer of workers.
pub struct PoolArbitrator<H> {
    inner: Arc<ArbitratorInner<H>>,
}

impl<H> Clone for PoolArbitrator<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H> std::fmt::Debug for PoolArbitrator<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolArbitrator")
            .field("workers", &self.inner.roster.lock().len())
            .field("scaling", &self.inner.scaling.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<H> PoolArbitrator<H>
where
    H: Send + Sync + 'static,
{
    /// Create an arbitrator for `pool`. Settings are taken from the pool.
    pub fn new(
        pool: BrowserPool<H>,
        factory: Arc<dyn BrowserFactory<H>>,
        clock: Arc<dyn Clock>,
        spawner: TokioSpawner,
    ) -> Self {
        let probe: Arc<dyn BrowserCommand<H>> = Arc::new(FactoryProbe {
            factory: Arc::clone(&factory),
        });
        Self {
            inner: Arc::new(ArbitratorInner {
                settings: pool.settings().clone(),
                pool,
                factory,
                clock,
                spawner,
                roster: Mutex::new(Vec::new()),
                scaling: AtomicBool::new(false),
                stop: Mutex::new(CancellationToken::new()),
                fault: Arc::new(LoopFault::default()),
                probe,
            }),
        }
    }

    /// Pre-create workers if configured, start the pool and launch the
    /// control loop. The first tick runs one tick interval later.
    ///
    /// # Errors
    ///
    /// [`PoolError::AlreadyStarted`] while the pool is running.
    pub async fn start(&self) -> Result<(), PoolError> {
        let inner = &self.inner;
        if inner.pool.is_running() {
            return Err(PoolError::AlreadyStarted);
        }
        let stop = CancellationToken::new();
        *inner.stop.lock() = stop.clone();

        let mut workers = Vec::new();
        if inner.settings.start_browsers_on_run {
            let mut max_idle = inner.settings.max_idle_time();
            for _ in 0..inner.settings.max_degree_of_parallel {
                if let Some(worker) = inner.create_worker(max_idle).await {
                    debug!(worker_id = %worker.id(), "started browser on run");
                    workers.push(worker);
                }
                max_idle += inner.settings.delta_idle_time();
            }
        }
        inner.roster.lock().extend(workers.iter().cloned());

        if let Err(e) = inner.pool.start(workers).await {
            stop.cancel();
            inner.release_all().await;
            return Err(e);
        }

        let looping = Arc::clone(inner);
        inner.spawner.spawn_supervised(
            "arbitrator",
            ArbitratorInner::control_loop(looping, stop),
            Arc::clone(&inner.fault),
        );
        info!(workers = inner.roster.lock().len(), "arbitrator started");
        Ok(())
    }

    /// Cancel the control loop, stop the pool and release every worker.
    /// Idempotent.
    ///
    /// Releasing waits for jobs still holding a session.
    ///
    /// # Errors
    ///
    /// Propagates the pool's failure to persist its queue; workers are
    /// released regardless.
    pub async fn stop(&self) -> Result<(), PoolError> {
        let stop = self.inner.stop.lock().clone();
        stop.cancel();
        let stopped = self.inner.pool.stop().await;
        let released = self.inner.release_all().await;
        info!(released, "arbitrator stopped");
        stopped
    }

    /// Run one control iteration right now.
    pub async fn tick(&self) -> TickOutcome {
        let stop = self.inner.stop.lock().clone();
        self.inner.tick(&stop).await
    }

    /// Snapshot of every worker in the roster.
    #[must_use]
    pub fn workers(&self) -> Vec<WorkerSnapshot> {
        self.inner
            .roster
            .lock()
            .iter()
            .map(|w| w.snapshot())
            .collect()
    }

    /// The pool this arbitrator drives.
    #[must_use]
    pub fn pool(&self) -> &BrowserPool<H> {
        &self.inner.pool
    }

    /// Panic message of the control loop, if it died.
    #[must_use]
    pub fn loop_fault(&self) -> Option<String> {
        self.inner.fault.get()
    }
}

impl<H> ArbitratorInner<H>
where
    H: Send + Sync + 'static,
{
    async fn control_loop(self: Arc<Self>, stop: CancellationToken) {
        debug!("control loop started");
        let interval = self.settings.control_tick_interval();
        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
            let outcome = self.tick(&stop).await;
            if outcome != TickOutcome::default() {
                debug!(?outcome, "control tick");
            }
        }
        debug!("control loop stopped");
    }

    async fn tick(self: &Arc<Self>, stop: &CancellationToken) -> TickOutcome {
        let now = self.clock.now_ms();
        TickOutcome {
            evicted: self.evict_tagged().await,
            tagged: self.tag_idle(now),
            health_checked: self.send_health_check(now),
            scaling_up: self.scale_up(stop),
        }
    }

    async fn evict_tagged(&self) -> Option<WorkerId> {
        let worker = self
            .roster
            .lock()
            .iter()
            .find(|w| w.is_retiring() && !w.is_busy())
            .cloned()?;
        // Idle workers are claimed under the idle lock; a worker outside the
        // idle set is either held by a job or was set aside by its last one.
        let claimed = self.pool.take_idle_worker(worker.id()).is_some() || worker.try_claim();
        if !claimed {
            return None;
        }
        self.roster.lock().retain(|w| w.id() != worker.id());
        self.release(&worker).await;
        info!(worker_id = %worker.id(), fails = worker.fails(), "worker evicted");
        Some(worker.id())
    }

    fn tag_idle(&self, now_ms: u64) -> Option<WorkerId> {
        let roster = self.roster.lock();
        let active = roster.iter().filter(|w| !w.is_retiring()).count();
        if self.settings.keep_alive_at_least_one_browser && active <= 1 {
            return None;
        }
        let worker = select_idle_candidate(roster.as_slice(), now_ms)?;
        if !worker.tag_for_retirement() {
            return None;
        }
        debug!(worker_id = %worker.id(), "idle worker tagged for retirement");
        Some(worker.id())
    }

    fn send_health_check(&self, now_ms: u64) -> Option<WorkerId> {
        let interval = self.settings.health_check_interval()?;
        let worker_id = select_health_candidate(self.roster.lock().as_slice(), now_ms, interval)?.id();
        let command = Command::health_check(Arc::clone(&self.probe));
        let pool = self.pool.clone();
        self.spawner
            .spawn(async move { pool.run_health_check(worker_id, command).await });
        Some(worker_id)
    }

    /// Launch a background scale-up when the backlog or the keep-alive floor
    /// asks for one and none is already running.
    fn scale_up(self: &Arc<Self>, stop: &CancellationToken) -> bool {
        if stop.is_cancelled() {
            return false;
        }
        let active = self.roster.lock().iter().filter(|w| !w.is_retiring()).count();
        let backlog = active < self.settings.max_degree_of_parallel
            && active * self.settings.max_queue_size_per_browser < self.pool.queue_length();
        let floor = active == 0 && self.settings.keep_alive_at_least_one_browser;
        if !(backlog || floor) {
            return false;
        }
        if self.scaling.swap(true, Ordering::AcqRel) {
            return false;
        }

        let inner = Arc::clone(self);
        let stop = stop.clone();
        self.spawner.spawn(async move {
            let added = inner.add_worker(&stop).await;
            inner.scaling.store(false, Ordering::Release);
            if let Some(worker) = added {
                inner.pool.register_worker(worker);
            }
        });
        true
    }

    /// Create a worker and put it on the roster. Returns it for registration
    /// with the pool, or `None` if creation failed or the arbitrator stopped.
    async fn add_worker(&self, stop: &CancellationToken) -> Option<Arc<BrowserWorker<H>>> {
        let max_idle = self
            .roster
            .lock()
            .last()
            .map_or_else(|| self.settings.max_idle_time(), |w| w.max_idle())
            + self.settings.delta_idle_time();
        let worker = self.create_worker(max_idle).await?;

        let admitted = {
            let mut roster = self.roster.lock();
            if stop.is_cancelled() {
                false
            } else {
                roster.push(Arc::clone(&worker));
                true
            }
        };
        if admitted {
            info!(
                worker_id = %worker.id(),
                max_idle_ms = duration_ms(max_idle),
                "browser started"
            );
            Some(worker)
        } else {
            debug!(worker_id = %worker.id(), "stopped while starting a browser, releasing it");
            self.release(&worker).await;
            None
        }
    }

    async fn create_worker(&self, max_idle: Duration) -> Option<Arc<BrowserWorker<H>>> {
        match self.factory.create().await {
            Ok(browser) => Some(Arc::new(BrowserWorker::new(
                browser,
                max_idle,
                self.clock.now_ms(),
            ))),
            Err(e) => {
                error!(error = %e, "failed to create browser");
                None
            }
        }
    }

    async fn release(&self, worker: &BrowserWorker<H>) {
        let Some(browser) = worker.take_browser().await else {
            return;
        };
        if let Err(e) = self.factory.release(browser).await {
            warn!(worker_id = %worker.id(), error = %e, "browser session could not be released");
        }
    }

    async fn release_all(&self) -> usize {
        let workers = std::mem::take(&mut *self.roster.lock());
        for worker in &workers {
            self.release(worker).await;
        }
        workers.len()
    }
}

/// Idle, untagged worker furthest past its own idle threshold. Ties go to the
/// one with the oldest last job.
fn select_idle_candidate<H>(
    workers: &[Arc<BrowserWorker<H>>],
    now_ms: u64,
) -> Option<Arc<BrowserWorker<H>>> {
    workers
        .iter()
        .filter(|w| !w.is_busy() && !w.is_retiring())
        .filter_map(|w| w.idle_overrun_ms(now_ms).map(|overrun| (overrun, w)))
        .max_by(|(a_overrun, a), (b_overrun, b)| {
            a_overrun
                .cmp(b_overrun)
                .then_with(|| b.last_job_ms().cmp(&a.last_job_ms()))
        })
        .map(|(_, w)| Arc::clone(w))
}

/// Idle, untagged worker whose last health check is older than `interval`,
/// least recently checked first.
fn select_health_candidate<H>(
    workers: &[Arc<BrowserWorker<H>>],
    now_ms: u64,
    interval: Duration,
) -> Option<Arc<BrowserWorker<H>>> {
    let interval_ms = duration_ms(interval);
    workers
        .iter()
        .filter(|w| !w.is_busy() && !w.is_retiring())
        .filter(|w| now_ms.saturating_sub(w.last_health_ms()) > interval_ms)
        .min_by_key(|w| w.last_health_ms())
        .cloned()
}
