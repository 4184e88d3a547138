//! Configuration models for the pool and its control loop.

pub mod pool;

pub use pool::PoolSettings;
