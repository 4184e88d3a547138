//! Command model: the unit of work executed against a browser session.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::{CommandError, Dependencies};
use crate::util::serde::{new_id, CommandId};

/// Caller-supplied logic of a command.
///
/// Implementations must tolerate being invoked more than once: a failed run is
/// retried until the pool's attempt budget is exhausted.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_browser_pool::core::{BrowserCommand, Dependencies};
/// use tokio_util::sync::CancellationToken;
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct OpenPage {
///     url: String,
/// }
///
/// #[async_trait]
/// impl BrowserCommand<WebDriver> for OpenPage {
///     async fn execute(
///         &self,
///         browser: &WebDriver,
///         _cancel: &CancellationToken,
///         _deps: &Dependencies,
///         _run_number: u32,
///     ) -> anyhow::Result<()> {
///         browser.goto(&self.url).await?;
///         Ok(())
///     }
///
///     fn payload(&self) -> Option<serde_json::Value> {
///         serde_json::to_value(self).ok()
///     }
/// }
/// ```
#[async_trait]
pub trait BrowserCommand<H>: Send + Sync + 'static
where
    H: Send + Sync + 'static,
{
    /// Run against `browser`.
    ///
    /// # Arguments
    ///
    /// * `browser` - The session handle owned by the executing worker
    /// * `cancel` - The command's own cancellation signal
    /// * `deps` - Services registered with the pool
    /// * `run_number` - Zero-based attempt number of this invocation
    async fn execute(
        &self,
        browser: &H,
        cancel: &CancellationToken,
        deps: &Dependencies,
        run_number: u32,
    ) -> anyhow::Result<()>;

    /// Stable name used to persist and restore the command.
    fn kind(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Serializable form of the command, `None` if it cannot be stored.
    fn payload(&self) -> Option<serde_json::Value> {
        None
    }
}

/// Which protocol a command is executed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Durable work: persisted, retried, counted against the attempt budget.
    Standard,
    /// Internal liveness probe: never persisted nor retried.
    HealthCheck,
}

/// Why a command ended up in the problem sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandProblem {
    /// The attempt budget was exhausted.
    #[serde(rename = "too-many-attempts")]
    TooManyRuns,
    /// The command was cancelled before it could run to completion.
    #[serde(rename = "cancelled")]
    OperationCancelled,
}

impl fmt::Display for CommandProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyRuns => write!(f, "too-many-attempts"),
            Self::OperationCancelled => write!(f, "cancelled"),
        }
    }
}

/// A unit of work with identity, cancellation signal and attempt counter.
pub struct Command<H> {
    id: CommandId,
    kind: CommandKind,
    cancellation: CancellationToken,
    runs: u32,
    logic: Arc<dyn BrowserCommand<H>>,
}

impl<H> Clone for Command<H> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            kind: self.kind,
            cancellation: self.cancellation.clone(),
            runs: self.runs,
            logic: Arc::clone(&self.logic),
        }
    }
}

impl<H> fmt::Debug for Command<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("runs", &self.runs)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<H> Command<H>
where
    H: Send + Sync + 'static,
{
    /// Wrap `logic` into a fresh standard command.
    pub fn new<C: BrowserCommand<H>>(logic: C) -> Self {
        Self::from_shared(Arc::new(logic))
    }

    /// Wrap shared `logic` into a fresh standard command.
    #[must_use]
    pub fn from_shared(logic: Arc<dyn BrowserCommand<H>>) -> Self {
        Self {
            id: new_id(),
            kind: CommandKind::Standard,
            cancellation: CancellationToken::new(),
            runs: 0,
            logic,
        }
    }

    /// Rebuild a standard command read back from storage.
    ///
    /// The attempt counter is taken over verbatim; only the pool advances it.
    #[must_use]
    pub fn restore(id: CommandId, runs: u32, logic: Arc<dyn BrowserCommand<H>>) -> Self {
        Self {
            id,
            kind: CommandKind::Standard,
            cancellation: CancellationToken::new(),
            runs,
            logic,
        }
    }

    pub(crate) fn health_check(logic: Arc<dyn BrowserCommand<H>>) -> Self {
        Self {
            kind: CommandKind::HealthCheck,
            ..Self::from_shared(logic)
        }
    }

    /// Use `token` as the command's cancellation signal.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Unique identifier.
    #[must_use]
    pub const fn id(&self) -> CommandId {
        self.id
    }

    /// Execution protocol of this command.
    #[must_use]
    pub const fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Number of times the logic has been invoked.
    #[must_use]
    pub const fn runs(&self) -> u32 {
        self.runs
    }

    /// The command's own cancellation signal.
    #[must_use]
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether the cancellation signal has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Persisted name of the command logic.
    #[must_use]
    pub fn name(&self) -> &str {
        self.logic.kind()
    }

    /// Serializable form of the command logic, if any.
    #[must_use]
    pub fn payload(&self) -> Option<serde_json::Value> {
        self.logic.payload()
    }

    /// Shared command logic.
    #[must_use]
    pub const fn logic(&self) -> &Arc<dyn BrowserCommand<H>> {
        &self.logic
    }

    /// Advance the attempt counter, returning the run number of the attempt
    /// about to start.
    pub(crate) fn begin_attempt(&mut self) -> u32 {
        let run_number = self.runs;
        self.runs += 1;
        run_number
    }

    /// Invoke the logic, aborting with [`CommandError::Cancelled`] once the
    /// cancellation signal fires. A panic in the logic surfaces as
    /// [`CommandError::Panicked`].
    pub(crate) async fn invoke(
        &self,
        browser: &H,
        deps: &Dependencies,
        run_number: u32,
    ) -> anyhow::Result<()> {
        let run = AssertUnwindSafe(self.logic.execute(browser, &self.cancellation, deps, run_number))
            .catch_unwind();
        tokio::select! {
            biased;
            () = self.cancellation.cancelled() => Err(CommandError::Cancelled.into()),
            caught = run => caught.unwrap_or_else(|payload| {
                Err(CommandError::Panicked(panic_message(payload.as_ref())).into())
            }),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
