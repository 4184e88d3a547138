//! Identifier aliases and small serialization helpers.

use uuid::Uuid;

/// Identifier of a queued or persisted command.
pub type CommandId = Uuid;

/// Identifier of a worker wrapper, assigned when the worker is created.
pub type WorkerId = Uuid;

/// Allocate a fresh random identifier.
#[must_use]
pub fn new_id() -> Uuid {
    Uuid::new_v4()
}
