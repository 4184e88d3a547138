//! Browser pool: command admission, the dispatch loop and the job protocol.
//!
//! Submissions land in the dispatch queue; a single supervised dispatch
//! loop pairs queued commands with idle workers and spawns one job task per
//! pair. Commands that cannot stay in memory (queue full, pool stopped) go to
//! the [`StateProvider`], never to the floor.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::PoolSettings;
use crate::core::dispatch::DispatchQueue;
use crate::core::stats::PoolCounters;
use crate::core::{
    BrowserWorker, Command, CommandError, CommandKind, CommandProblem, Dependencies, PoolError,
    PoolStats, RejectedCommand, StateError, StateProvider,
};
use crate::runtime::{LoopFault, TokioSpawner};
use crate::util::clock::Clock;
use crate::util::serde::WorkerId;

/// Lifecycle of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolStatus {
    /// Constructed, never started. Submissions are queued in memory.
    NotStarted,
    /// Dispatch loop is running.
    Running,
    /// Stopped; new submissions go straight to the state provider.
    Stopped,
}

/// Where a submitted command ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Admission {
    /// Appended to the in-memory queue.
    Queued,
    /// Handed to the state provider for later processing.
    Persisted,
}

struct Lifecycle {
    status: PoolStatus,
    stop: CancellationToken,
}

struct PoolInner<H> {
    settings: PoolSettings,
    state: Arc<dyn StateProvider<H>>,
    clock: Arc<dyn Clock>,
    deps: Arc<Dependencies>,
    spawner: TokioSpawner,
    queue: DispatchQueue<H>,
    counters: PoolCounters,
    lifecycle: Mutex<Lifecycle>,
    fault: Arc<LoopFault>,
}

/// Shared handle to a browser pool. Cloning is cheap.
pub struct BrowserPool<H> {
    inner: Arc<PoolInner<H>>,
}

impl<H> Clone for BrowserPool<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H> std::fmt::Debug for BrowserPool<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserPool")
            .field("status", &self.inner.lifecycle.lock().status)
            .field("queued_commands", &self.inner.queue.len())
            .field("idle_workers", &self.inner.queue.idle_len())
            .finish_non_exhaustive()
    }
}

impl<H> BrowserPool<H>
where
    H: Send + Sync + 'static,
{
    /// Create a stopped pool. Prefer [`crate::builders::PoolBuilder`], which
    /// also wires the arbitrator.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] when `settings` fail validation.
    pub fn new(
        settings: PoolSettings,
        state: Arc<dyn StateProvider<H>>,
        clock: Arc<dyn Clock>,
        deps: Arc<Dependencies>,
        spawner: TokioSpawner,
    ) -> Result<Self, PoolError> {
        settings.validate().map_err(PoolError::InvalidConfig)?;
        let queue = DispatchQueue::new(settings.queue_limit);
        Ok(Self {
            inner: Arc::new(PoolInner {
                settings,
                state,
                clock,
                deps,
                spawner,
                queue,
                counters: PoolCounters::default(),
                lifecycle: Mutex::new(Lifecycle {
                    status: PoolStatus::NotStarted,
                    stop: CancellationToken::new(),
                }),
                fault: Arc::new(LoopFault::default()),
            }),
        })
    }

    /// Enqueue a command, or persist it when the queue is full or the pool
    /// has been stopped. Never rejects.
    pub async fn submit(&self, command: Command<H>) -> Admission {
        PoolCounters::bump(&self.inner.counters.submitted);
        match self.inner.try_enqueue(command) {
            Ok(()) => Admission::Queued,
            Err(command) => {
                debug!(command_id = %command.id(), "queue unavailable, persisting command");
                self.inner.persist(command).await;
                Admission::Persisted
            }
        }
    }

    /// Commands currently waiting in memory.
    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.inner.queue.len()
    }

    /// Pull up to `take` persisted commands back into the queue, bounded by
    /// the free queue space when a limit is configured. Returns how many were
    /// enqueued.
    ///
    /// # Errors
    ///
    /// [`PoolError::NotStarted`] before the first start, or a state provider
    /// failure.
    pub async fn load_additional(&self, take: usize) -> Result<usize, PoolError> {
        if self.status() == PoolStatus::NotStarted {
            return Err(PoolError::NotStarted);
        }
        let take = match self.inner.settings.queue_limit {
            Some(limit) => take.min(limit.saturating_sub(self.inner.queue.len())),
            None => take,
        };
        if take == 0 {
            return Ok(0);
        }

        let commands = self.inner.state.load_commands(Some(take)).await?;
        let mut loaded = 0;
        for command in commands {
            match self.inner.try_enqueue(command) {
                Ok(()) => loaded += 1,
                Err(command) => {
                    self.inner.persist(command).await;
                }
            }
        }
        debug!(loaded, "loaded additional commands");
        Ok(loaded)
    }

    /// Start dispatching with the given initial workers.
    ///
    /// Persisted commands are loaded into the queue first; a restart after
    /// [`stop`](Self::stop) is allowed.
    ///
    /// # Errors
    ///
    /// [`PoolError::AlreadyStarted`] while the pool is running.
    pub async fn start(&self, workers: Vec<Arc<BrowserWorker<H>>>) -> Result<(), PoolError> {
        let stop = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.status == PoolStatus::Running {
                return Err(PoolError::AlreadyStarted);
            }
            lifecycle.status = PoolStatus::Running;
            lifecycle.stop = CancellationToken::new();
            lifecycle.stop.clone()
        };

        let limit = self
            .inner
            .settings
            .queue_limit
            .map(|limit| limit.saturating_sub(self.inner.queue.len()));
        if limit != Some(0) {
            match self.inner.state.load_commands(limit).await {
                Ok(commands) => {
                    let restored = commands.len();
                    for command in commands {
                        if let Err(command) = self.inner.try_enqueue(command) {
                            self.inner.persist(command).await;
                        }
                    }
                    debug!(restored, "restored persisted commands");
                }
                Err(e) => error!(error = %e, "failed to load persisted commands"),
            }
        }

        let worker_count = workers.len();
        for worker in workers {
            self.inner.queue.push_worker(worker);
        }

        let inner = Arc::clone(&self.inner);
        self.inner.spawner.spawn_supervised(
            "dispatch",
            PoolInner::dispatch_loop(inner, stop),
            Arc::clone(&self.inner.fault),
        );
        info!(
            workers = worker_count,
            queued = self.inner.queue.len(),
            "browser pool started"
        );
        Ok(())
    }

    /// Stop dispatching and persist every queued command. Idempotent.
    ///
    /// Jobs already in flight keep running; their shutdown observers persist
    /// the commands they hold.
    ///
    /// Every drained command the provider can store is stored, even when
    /// some of its neighbours are refused.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::CommandsLost`] after the shutdown completed if
    /// some drained commands could not be stored.
    pub async fn stop(&self) -> Result<(), PoolError> {
        let stop = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.status != PoolStatus::Running {
                debug!(status = ?lifecycle.status, "stop ignored, pool not running");
                return Ok(());
            }
            lifecycle.status = PoolStatus::Stopped;
            lifecycle.stop.clone()
        };
        stop.cancel();

        let remaining = self.inner.queue.drain_commands();
        let idle = self.inner.queue.clear_workers();
        let drained = remaining.len();
        let saved = if remaining.is_empty() {
            0
        } else {
            self.inner.persist_batch(remaining).await
        };
        let lost = drained - saved;
        info!(saved, lost, idle_workers = idle.len(), "browser pool stopped");
        if lost > 0 {
            return Err(PoolError::CommandsLost(lost));
        }
        Ok(())
    }

    /// Make a worker available for dispatch.
    pub fn register_worker(&self, worker: Arc<BrowserWorker<H>>) {
        debug!(worker_id = %worker.id(), "worker registered");
        self.inner.queue.push_worker(worker);
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.inner.lifecycle.lock().status
    }

    /// Whether the dispatch loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status() == PoolStatus::Running
    }

    /// Snapshot of the pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner
            .counters
            .snapshot(self.inner.queue.len(), self.inner.queue.idle_len())
    }

    /// Panic message of the dispatch loop, if it died.
    #[must_use]
    pub fn loop_fault(&self) -> Option<String> {
        self.inner.fault.get()
    }

    /// Settings the pool was built with.
    #[must_use]
    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    /// Take a specific worker out of the idle set, claimed.
    pub(crate) fn take_idle_worker(&self, id: WorkerId) -> Option<Arc<BrowserWorker<H>>> {
        self.inner.queue.take_worker(id)
    }

    /// Run a health-check command on one idle worker, bypassing the queue.
    pub(crate) async fn run_health_check(&self, worker_id: WorkerId, command: Command<H>) {
        let inner = Arc::clone(&self.inner);
        let span = info_span!("health_check", command_id = %command.id(), worker_id = %worker_id);
        inner.health_check(worker_id, command).instrument(span).await;
    }
}

impl<H> PoolInner<H>
where
    H: Send + Sync + 'static,
{
    async fn dispatch_loop(self: Arc<Self>, stop: CancellationToken) {
        debug!("dispatch loop started");
        let poll = self.settings.dispatch_poll_interval();
        loop {
            if stop.is_cancelled() {
                break;
            }
            if let Some((worker, command)) = self.queue.try_pair() {
                let span = info_span!(
                    "job",
                    command_id = %command.id(),
                    worker_id = %worker.id(),
                    run = command.runs() + 1
                );
                let job = Arc::clone(&self).run_job(worker, command, stop.clone());
                self.spawner.spawn(job.instrument(span));
                continue;
            }
            tokio::select! {
                () = stop.cancelled() => break,
                () = self.queue.wait(poll) => {}
            }
        }
        debug!("dispatch loop stopped");
    }

    /// Push under the lifecycle lock so a concurrent `stop` either sees the
    /// command in its drain or makes us persist it.
    fn try_enqueue(&self, command: Command<H>) -> Result<(), Command<H>> {
        let lifecycle = self.lifecycle.lock();
        if lifecycle.status == PoolStatus::Stopped {
            return Err(command);
        }
        self.queue.push_command(command)
    }

    async fn requeue(&self, command: Command<H>) {
        match self.try_enqueue(command) {
            Ok(()) => PoolCounters::bump(&self.counters.requeued),
            Err(command) => {
                self.persist(command).await;
            }
        }
    }

    /// Returns whether the command was stored.
    async fn persist(&self, command: Command<H>) -> bool {
        let id = command.id();
        match self.state.save_command(command).await {
            Ok(()) => {
                PoolCounters::bump(&self.counters.persisted);
                true
            }
            Err(e) => {
                PoolCounters::bump(&self.counters.dropped);
                error!(command_id = %id, error = %e, "failed to persist command, dropping it");
                false
            }
        }
    }

    /// Store a batch, retrying rejects one by one. Returns how many were
    /// stored.
    async fn persist_batch(&self, commands: Vec<Command<H>>) -> usize {
        let total = commands.len();
        let rejected = self.state.save_commands(commands).await;
        let mut stored = total - rejected.len();
        for _ in 0..stored {
            PoolCounters::bump(&self.counters.persisted);
        }
        for RejectedCommand { command, error } in rejected {
            if let StateError::NotPersistable(kind) = &error {
                PoolCounters::bump(&self.counters.dropped);
                error!(command_id = %command.id(), %kind, "command cannot be persisted, dropping it");
                continue;
            }
            warn!(command_id = %command.id(), error = %error, "batch save rejected command, retrying alone");
            if self.persist(command).await {
                stored += 1;
            }
        }
        stored
    }

    async fn save_problem(&self, command: Command<H>, problem: CommandProblem) {
        let id = command.id();
        warn!(command_id = %id, %problem, "command moved to problem sink");
        match self.state.save_problem_command(command, problem).await {
            Ok(()) => PoolCounters::bump(&self.counters.problems),
            Err(e) => error!(command_id = %id, error = %e, "failed to save problem command"),
        }
    }

    fn validate(&self, command: &Command<H>) -> Option<CommandProblem> {
        if command.runs() >= self.settings.command_max_runs {
            Some(CommandProblem::TooManyRuns)
        } else if command.is_cancelled() {
            Some(CommandProblem::OperationCancelled)
        } else {
            None
        }
    }

    /// Return a claimed worker to the idle set, or tag it once its failure
    /// budget is spent. Either way the claim is given up.
    fn settle_worker(&self, worker: Arc<BrowserWorker<H>>) {
        if worker.fails() < self.settings.browser_max_fail {
            self.queue.push_worker(worker);
            return;
        }
        if worker.tag_for_retirement() {
            warn!(
                worker_id = %worker.id(),
                fails = worker.fails(),
                "worker exhausted its failure budget, tagged for retirement"
            );
        }
        worker.release_claim();
    }

    /// `worker` arrives claimed by the dispatch queue; every path gives the
    /// claim up again.
    async fn run_job(
        self: Arc<Self>,
        worker: Arc<BrowserWorker<H>>,
        mut command: Command<H>,
        stop: CancellationToken,
    ) {
        if !worker.is_busy() {
            let fault = PoolError::InconsistentWorkerState(worker.id());
            error!(error = %fault, "dispatched worker was not claimed, requeueing command");
            PoolCounters::bump(&self.counters.consistency_faults);
            self.requeue(command).await;
            return;
        }
        if command.kind() == CommandKind::HealthCheck {
            error!("health-check command reached the standard job path, dropping it");
            self.queue.push_worker(worker);
            return;
        }
        if let Some(problem) = self.validate(&command) {
            self.save_problem(command, problem).await;
            self.queue.push_worker(worker);
            return;
        }
        if stop.is_cancelled() {
            self.persist(command).await;
            self.queue.push_worker(worker);
            return;
        }
        if worker.is_retiring() {
            debug!("worker is retiring, requeueing command");
            self.requeue(command).await;
            worker.release_claim();
            return;
        }

        let run_number = command.begin_attempt();
        let (done, observer) = self.spawn_stop_observer(&command, stop);
        let outcome = {
            let browser = worker.browser().lock().await;
            match browser.as_ref() {
                Some(browser) => command.invoke(browser, &self.deps, run_number).await,
                None => Err(CommandError::HandleReleased.into()),
            }
        };
        done.cancel();
        let persisted_on_stop = observer.await.unwrap_or(false);

        if let Err(e) = self.state.command_processed(&command).await {
            warn!(error = %e, "state provider rejected processed notification");
        }

        match outcome {
            Ok(()) => {
                PoolCounters::bump(&self.counters.completed);
                debug!("job completed");
            }
            Err(e) => {
                let fails = worker.record_failure();
                PoolCounters::bump(&self.counters.failed);
                error!(error = %format!("{e:#}"), fails, "job failed");
                if persisted_on_stop {
                    debug!("command already persisted on stop");
                } else if command.is_cancelled() {
                    self.save_problem(command, CommandProblem::OperationCancelled)
                        .await;
                } else {
                    self.requeue(command).await;
                }
            }
        }

        worker.record_job(self.clock.now_ms());
        self.settle_worker(worker);
    }

    /// Watch for pool stop while a job runs; persist the command if the stop
    /// comes first. The handle resolves to whether it persisted.
    fn spawn_stop_observer(
        self: &Arc<Self>,
        command: &Command<H>,
        stop: CancellationToken,
    ) -> (CancellationToken, JoinHandle<bool>) {
        let done = CancellationToken::new();
        let watching = done.clone();
        let cancelled = command.cancellation_token().clone();
        let snapshot = command.clone();
        let inner = Arc::clone(self);
        let handle = self.spawner.spawn(async move {
            tokio::select! {
                biased;
                () = watching.cancelled() => false,
                () = cancelled.cancelled() => false,
                () = stop.cancelled() => {
                    debug!(command_id = %snapshot.id(), "pool stopping mid-job, persisting command");
                    inner.persist(snapshot).await;
                    true
                }
            }
        });
        (done, handle)
    }

    async fn health_check(self: Arc<Self>, worker_id: WorkerId, mut command: Command<H>) {
        if self.lifecycle.lock().status != PoolStatus::Running {
            return;
        }
        let Some(worker) = self.queue.take_worker(worker_id) else {
            debug!("worker not idle or already held, health check skipped");
            return;
        };
        if worker.is_retiring() {
            worker.release_claim();
            return;
        }

        let run_number = command.begin_attempt();
        let outcome = {
            let browser = worker.browser().lock().await;
            match browser.as_ref() {
                Some(browser) => command.invoke(browser, &self.deps, run_number).await,
                None => Err(CommandError::HandleReleased.into()),
            }
        };
        PoolCounters::bump(&self.counters.health_checks);
        if let Err(e) = outcome {
            let fails = worker.record_failure();
            PoolCounters::bump(&self.counters.health_check_failures);
            warn!(error = %format!("{e:#}"), fails, "health check failed");
        } else {
            debug!("health check passed");
        }

        worker.record_health(self.clock.now_ms());
        self.settle_worker(worker);
    }
}
