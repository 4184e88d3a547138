//! Tokio runtime spawner with supervision for long-running loops.

use std::future::Future;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Records why a supervised loop died, so the owning service can react.
#[derive(Debug, Default)]
pub struct LoopFault {
    message: Mutex<Option<String>>,
}

impl LoopFault {
    /// Failure description of the loop, `None` while it is healthy.
    pub fn get(&self) -> Option<String> {
        self.message.lock().clone()
    }

    pub(crate) fn record(&self, message: String) {
        *self.message.lock() = Some(message);
    }

    pub(crate) fn clear(&self) {
        *self.message.lock() = None;
    }
}

/// Tokio-based spawner that executes tasks on a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioSpawner {
    handle: Handle,
}

impl TokioSpawner {
    /// Create a new TokioSpawner from a tokio runtime handle.
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Spawner bound to the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    #[must_use]
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Spawner bound to the current runtime, if there is one.
    #[must_use]
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// Spawn a future on the runtime.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(fut)
    }

    /// Spawn a loop whose abnormal termination is logged and recorded in
    /// `fault`. Aborting the loop is not a fault.
    pub fn spawn_supervised<F>(
        &self,
        name: &'static str,
        fut: F,
        fault: std::sync::Arc<LoopFault>,
    ) where
        F: Future<Output = ()> + Send + 'static,
    {
        fault.clear();
        let task = self.handle.spawn(fut);
        self.handle.spawn(async move {
            match task.await {
                Ok(()) => debug!(loop_name = name, "loop exited"),
                Err(e) if e.is_cancelled() => debug!(loop_name = name, "loop aborted"),
                Err(e) => {
                    error!(loop_name = name, error = %e, "loop task failed");
                    fault.record(format!("{name} loop failed: {e}"));
                }
            }
        });
    }
}
