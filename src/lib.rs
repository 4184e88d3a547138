//! # Prometheus Browser Pool
//!
//! A scheduler and lifecycle arbitrator for pools of expensive remote browser
//! sessions.
//!
//! Callers submit [`Command`](core::Command)s; the pool runs each one on a
//! browser session, never two at once on the same session, and retries failures
//! up to a bounded number of attempts. The arbitrator owns the sessions: it
//! starts new ones when the backlog grows, retires sessions that sat idle past
//! their threshold or failed too often, and probes idle sessions with periodic
//! health checks.
//!
//! ## Key Features
//!
//! - **Bounded admission**: a full queue spills to the state provider instead
//!   of rejecting work
//! - **Restart safety**: queued and in-flight commands are persisted on stop
//!   and loaded back on start
//! - **Bounded retries**: exhausted or cancelled commands land in a problem sink
//! - **Staggered idle retirement**: each new session idles a little longer than
//!   the previous one, so the pool shrinks one session at a time
//!
//! ## Usage
//!
//! ```rust,ignore
//! use prometheus_browser_pool::builders::PoolBuilder;
//! use prometheus_browser_pool::config::PoolSettings;
//! use prometheus_browser_pool::core::Command;
//!
//! let (pool, arbitrator) = PoolBuilder::new(PoolSettings::from_env()?)
//!     .with_factory(my_factory)
//!     .with_state(my_state_provider)
//!     .build()?;
//!
//! arbitrator.start().await?;
//! pool.submit(Command::new(OpenPage { url: "https://example.com".into() })).await;
//! arbitrator.stop().await?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: commands, workers, pool and arbitrator.
pub mod core;
/// Configuration models for the pool.
pub mod config;
/// Builders to wire a pool and its arbitrator.
pub mod builders;
/// Infrastructure adapters for command persistence.
pub mod infra;
/// Tokio runtime adapter and API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
