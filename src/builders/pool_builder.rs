//! Assemble a [`BrowserPool`] and its [`PoolArbitrator`] from settings and
//! collaborators.

use std::sync::Arc;

use crate::config::PoolSettings;
use crate::core::{
    BrowserFactory, BrowserPool, Dependencies, PoolArbitrator, PoolError, StateProvider,
};
use crate::infra::InMemoryStateProvider;
use crate::runtime::TokioSpawner;
use crate::util::clock::{Clock, SystemClock};

/// Builder for a pool/arbitrator pair sharing one set of collaborators.
///
/// Only the factory is mandatory. The state provider defaults to
/// [`InMemoryStateProvider`], the clock to [`SystemClock`] and the spawner to
/// the current tokio runtime.
pub struct PoolBuilder<H> {
    settings: PoolSettings,
    factory: Option<Arc<dyn BrowserFactory<H>>>,
    state: Option<Arc<dyn StateProvider<H>>>,
    clock: Arc<dyn Clock>,
    deps: Dependencies,
    spawner: Option<TokioSpawner>,
}

impl<H> PoolBuilder<H>
where
    H: Send + Sync + 'static,
{
    /// Start from `settings`.
    #[must_use]
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            settings,
            factory: None,
            state: None,
            clock: Arc::new(SystemClock),
            deps: Dependencies::new(),
            spawner: None,
        }
    }

    /// Browser factory used to create, probe and release sessions.
    #[must_use]
    pub fn with_factory(self, factory: impl BrowserFactory<H>) -> Self {
        self.with_shared_factory(Arc::new(factory))
    }

    /// Shared browser factory.
    #[must_use]
    pub fn with_shared_factory(mut self, factory: Arc<dyn BrowserFactory<H>>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// State provider receiving overflow, shutdown and problem commands.
    #[must_use]
    pub fn with_state(self, state: impl StateProvider<H>) -> Self {
        self.with_shared_state(Arc::new(state))
    }

    /// Shared state provider, e.g. one the caller keeps inspecting.
    #[must_use]
    pub fn with_shared_state(mut self, state: Arc<dyn StateProvider<H>>) -> Self {
        self.state = Some(state);
        self
    }

    /// Time source for idle and health bookkeeping.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Services handed to every command execution.
    #[must_use]
    pub fn with_dependencies(mut self, deps: Dependencies) -> Self {
        self.deps = deps;
        self
    }

    /// Runtime the loops and jobs are spawned on.
    #[must_use]
    pub fn with_spawner(mut self, spawner: TokioSpawner) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Validate and build the pair. Nothing is started.
    ///
    /// # Errors
    ///
    /// [`PoolError::InvalidConfig`] for invalid settings, a missing factory,
    /// or no spawner outside a tokio runtime.
    pub fn build(self) -> Result<(BrowserPool<H>, PoolArbitrator<H>), PoolError> {
        let factory = self
            .factory
            .ok_or_else(|| PoolError::InvalidConfig("a browser factory is required".into()))?;
        let spawner = match self.spawner {
            Some(spawner) => spawner,
            None => TokioSpawner::try_current().ok_or_else(|| {
                PoolError::InvalidConfig("no spawner given and no tokio runtime running".into())
            })?,
        };
        let state = self
            .state
            .unwrap_or_else(|| Arc::new(InMemoryStateProvider::new()));

        let pool = BrowserPool::new(
            self.settings,
            state,
            Arc::clone(&self.clock),
            Arc::new(self.deps),
            spawner.clone(),
        )?;
        let arbitrator = PoolArbitrator::new(pool.clone(), factory, self.clock, spawner);
        Ok((pool, arbitrator))
    }
}
