//! Error types for pool, persistence and factory operations.

use thiserror::Error;

use crate::util::serde::WorkerId;

/// Errors produced by the pool and the arbitrator.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Settings failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// `start` was called on a running component.
    #[error("already started")]
    AlreadyStarted,
    /// The operation needs a component that has been started at least once.
    #[error("not started")]
    NotStarted,
    /// A worker was claimed while another job held it.
    #[error("worker {0} is in inconsistent state: claimed while busy")]
    InconsistentWorkerState(WorkerId),
    /// Commands drained at shutdown that the state provider refused.
    #[error("{0} queued commands could not be persisted")]
    CommandsLost(usize),
    /// Persistence failure.
    #[error(transparent)]
    State(#[from] StateError),
    /// Session creation or release failure.
    #[error(transparent)]
    Factory(#[from] FactoryError),
}

/// Errors produced by state providers.
#[derive(Debug, Error)]
pub enum StateError {
    /// Underlying storage I/O failed.
    #[error("state io error: {0}")]
    Io(#[from] std::io::Error),
    /// A record could not be encoded or decoded.
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The command does not expose a persistable payload.
    #[error("command `{0}` cannot be persisted")]
    NotPersistable(String),
    /// A stored record names a command kind nobody registered.
    #[error("unknown command kind `{0}`")]
    UnknownCommand(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors produced by browser factories.
#[derive(Debug, Error)]
pub enum FactoryError {
    /// A new session could not be created.
    #[error("failed to create browser session: {0}")]
    Create(String),
    /// A session could not be shut down cleanly.
    #[error("failed to release browser session: {0}")]
    Release(String),
}

/// Errors raised by the pool around a command execution.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command's own cancellation signal fired.
    #[error("command cancelled")]
    Cancelled,
    /// The worker's session was already released.
    #[error("browser session already released")]
    HandleReleased,
    /// The command logic panicked; the payload message is kept.
    #[error("command panicked: {0}")]
    Panicked(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
