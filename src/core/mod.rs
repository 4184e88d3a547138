//! Core scheduling abstractions: commands, workers, the pool and its
//! arbitrator.

pub mod arbitrator;
pub mod command;
pub mod dependencies;
pub(crate) mod dispatch;
pub mod error;
pub mod factory;
pub mod pool;
pub mod state;
pub mod stats;
pub mod worker;

pub use arbitrator::{PoolArbitrator, TickOutcome};
pub use command::{BrowserCommand, Command, CommandKind, CommandProblem};
pub use dependencies::Dependencies;
pub use error::{AppResult, CommandError, FactoryError, PoolError, StateError};
pub use factory::BrowserFactory;
pub use pool::{Admission, BrowserPool, PoolStatus};
pub use state::{RejectedCommand, StateProvider};
pub use stats::PoolStats;
pub use worker::{BrowserWorker, WorkerSnapshot};
