//! State provider backends.

pub mod jsonl;
pub mod memory;

pub use jsonl::{CommandRegistry, JsonlStateProvider, PersistedCommand};
pub use memory::InMemoryStateProvider;
