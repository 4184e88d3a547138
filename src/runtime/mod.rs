//! Runtime adapters and the serializable API surface.

pub mod api;
pub mod tokio_spawner;

pub use api::{health, Health};
pub use tokio_spawner::{LoopFault, TokioSpawner};
