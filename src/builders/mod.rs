//! Builders to wire a pool and its arbitrator from settings.

pub mod pool_builder;

pub use pool_builder::PoolBuilder;
