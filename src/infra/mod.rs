//! Infrastructure adapters for command persistence.

pub mod state;

pub use state::{CommandRegistry, InMemoryStateProvider, JsonlStateProvider, PersistedCommand};
