//! In-memory state provider.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::{Command, CommandProblem, RejectedCommand, StateError, StateProvider};

/// Keeps persisted and problem commands in process memory.
///
/// Useful for development and tests; nothing survives a restart of the
/// process, only a restart of the pool.
pub struct InMemoryStateProvider<H> {
    saved: Mutex<VecDeque<Command<H>>>,
    problems: Mutex<Vec<(Command<H>, CommandProblem)>>,
    processed: AtomicU64,
}

impl<H> Default for InMemoryStateProvider<H> {
    fn default() -> Self {
        Self {
            saved: Mutex::new(VecDeque::new()),
            problems: Mutex::new(Vec::new()),
            processed: AtomicU64::new(0),
        }
    }
}

impl<H> InMemoryStateProvider<H> {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a command as if it had been persisted earlier.
    pub fn seed(&self, command: Command<H>) {
        self.saved.lock().push_back(command);
    }

    /// Commands waiting to be loaded, oldest first.
    pub fn saved(&self) -> Vec<Command<H>> {
        self.saved.lock().iter().cloned().collect()
    }

    /// Number of commands waiting to be loaded.
    pub fn saved_len(&self) -> usize {
        self.saved.lock().len()
    }

    /// Problem sink contents in arrival order.
    pub fn problems(&self) -> Vec<(Command<H>, CommandProblem)> {
        self.problems.lock().clone()
    }

    /// How many processed notifications were received.
    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<H> StateProvider<H> for InMemoryStateProvider<H>
where
    H: Send + Sync + 'static,
{
    async fn save_command(&self, command: Command<H>) -> Result<(), StateError> {
        self.saved.lock().push_back(command);
        Ok(())
    }

    async fn save_commands(&self, commands: Vec<Command<H>>) -> Vec<RejectedCommand<H>> {
        self.saved.lock().extend(commands);
        Vec::new()
    }

    async fn save_problem_command(
        &self,
        command: Command<H>,
        problem: CommandProblem,
    ) -> Result<(), StateError> {
        self.problems.lock().push((command, problem));
        Ok(())
    }

    async fn load_commands(&self, limit: Option<usize>) -> Result<Vec<Command<H>>, StateError> {
        let mut saved = self.saved.lock();
        let take = limit.map_or(saved.len(), |limit| limit.min(saved.len()));
        Ok(saved.drain(..take).collect())
    }

    async fn command_processed(&self, _command: &Command<H>) -> Result<(), StateError> {
        self.processed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
