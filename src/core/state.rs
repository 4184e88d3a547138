//! Durable storage contract for commands that leave the in-memory queue.

use async_trait::async_trait;

use crate::core::{Command, CommandProblem, StateError};

/// A command a provider declined to store, with the reason.
#[derive(Debug)]
pub struct RejectedCommand<H> {
    /// The command, handed back to the caller.
    pub command: Command<H>,
    /// Why it was not stored.
    pub error: StateError,
}

/// Persistence escape valve of the pool.
///
/// Receives commands that overflow the queue, that are still queued or in
/// flight at shutdown, and commands that will never be retried (the problem
/// sink). `load_commands` hands persisted work back on start.
#[async_trait]
pub trait StateProvider<H>: Send + Sync + 'static
where
    H: Send + Sync + 'static,
{
    /// Persist a single command for later processing.
    async fn save_command(&self, command: Command<H>) -> Result<(), StateError>;

    /// Persist a batch of commands, used when the pool stops.
    ///
    /// Storing is per command: everything the provider can store is stored,
    /// and the rest comes back as [`RejectedCommand`]s. The default saves
    /// the commands one by one.
    async fn save_commands(&self, commands: Vec<Command<H>>) -> Vec<RejectedCommand<H>> {
        let mut rejected = Vec::new();
        for command in commands {
            if let Err(error) = self.save_command(command.clone()).await {
                rejected.push(RejectedCommand { command, error });
            }
        }
        rejected
    }

    /// Move a command to the problem sink.
    async fn save_problem_command(
        &self,
        command: Command<H>,
        problem: CommandProblem,
    ) -> Result<(), StateError>;

    /// Take persisted commands back. `None` means the queue is unbounded and
    /// everything should be returned.
    async fn load_commands(&self, limit: Option<usize>) -> Result<Vec<Command<H>>, StateError>;

    /// Called after each standard job attempt finished, successful or not.
    async fn command_processed(&self, _command: &Command<H>) -> Result<(), StateError> {
        Ok(())
    }
}
