//! File-backed state provider using JSON lines.
//!
//! Pending commands live in `<dir>/commands.jsonl`, the problem sink in
//! `<dir>/problems.jsonl`. Each line is one [`PersistedCommand`]. Command
//! logic is rebuilt on load through a [`CommandRegistry`] keyed by
//! [`BrowserCommand::kind`](crate::core::BrowserCommand::kind).

use std::collections::HashMap;
use std::fs::{create_dir_all, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::core::{
    BrowserCommand, Command, CommandProblem, RejectedCommand, StateError, StateProvider,
};
use crate::util::serde::CommandId;

const COMMANDS_FILE: &str = "commands.jsonl";
const PROBLEMS_FILE: &str = "problems.jsonl";

/// One stored command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedCommand {
    /// Command identifier, kept across restarts.
    pub id: CommandId,
    /// Registry key of the command logic.
    pub kind: String,
    /// Attempts consumed so far.
    pub runs: u32,
    /// Serialized command logic.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    /// Problem reason, set only in the problem sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem: Option<CommandProblem>,
}

impl PersistedCommand {
    fn from_command<H>(command: &Command<H>, problem: Option<CommandProblem>) -> Self
    where
        H: Send + Sync + 'static,
    {
        Self {
            id: command.id(),
            kind: command.name().to_owned(),
            runs: command.runs(),
            payload: command.payload(),
            problem,
        }
    }
}

type Decoder<H> =
    Arc<dyn Fn(serde_json::Value) -> Result<Arc<dyn BrowserCommand<H>>, StateError> + Send + Sync>;

/// Maps stored command kinds back to command logic.
pub struct CommandRegistry<H> {
    decoders: HashMap<String, Decoder<H>>,
}

impl<H> Default for CommandRegistry<H> {
    fn default() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }
}

impl<H> CommandRegistry<H>
where
    H: Send + Sync + 'static,
{
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `C` under its default kind, the Rust type name.
    #[must_use]
    pub fn with<C>(self) -> Self
    where
        C: BrowserCommand<H> + DeserializeOwned,
    {
        self.with_kind::<C>(std::any::type_name::<C>())
    }

    /// Register `C` under an explicit kind. Use this when `C` overrides
    /// [`BrowserCommand::kind`].
    #[must_use]
    pub fn with_kind<C>(mut self, kind: impl Into<String>) -> Self
    where
        C: BrowserCommand<H> + DeserializeOwned,
    {
        let decoder: Decoder<H> = Arc::new(
            |value: serde_json::Value| -> Result<Arc<dyn BrowserCommand<H>>, StateError> {
                let logic: C = serde_json::from_value(value)?;
                Ok(Arc::new(logic))
            },
        );
        self.decoders.insert(kind.into(), decoder);
        self
    }

    /// Whether a decoder exists for `kind`.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    fn decode(&self, record: &PersistedCommand) -> Result<Command<H>, StateError> {
        let decoder = self
            .decoders
            .get(&record.kind)
            .ok_or_else(|| StateError::UnknownCommand(record.kind.clone()))?;
        let payload = record
            .payload
            .clone()
            .ok_or_else(|| StateError::NotPersistable(record.kind.clone()))?;
        Ok(Command::restore(record.id, record.runs, decoder(payload)?))
    }
}

/// JSONL-backed state provider.
pub struct JsonlStateProvider<H> {
    dir: PathBuf,
    registry: CommandRegistry<H>,
    io: Mutex<()>,
}

impl<H> JsonlStateProvider<H>
where
    H: Send + Sync + 'static,
{
    /// Open (creating if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>, registry: CommandRegistry<H>) -> Result<Self, StateError> {
        let dir = dir.as_ref().to_path_buf();
        create_dir_all(&dir)?;
        Ok(Self {
            dir,
            registry,
            io: Mutex::new(()),
        })
    }

    /// Records in the problem sink.
    ///
    /// # Errors
    ///
    /// I/O or decoding failures of the problem file.
    pub fn problems(&self) -> Result<Vec<PersistedCommand>, StateError> {
        let _guard = self.io.lock();
        read_records(&self.dir.join(PROBLEMS_FILE))
    }

    /// Records still waiting to be loaded.
    ///
    /// # Errors
    ///
    /// I/O or decoding failures of the commands file.
    pub fn pending(&self) -> Result<Vec<PersistedCommand>, StateError> {
        let _guard = self.io.lock();
        read_records(&self.dir.join(COMMANDS_FILE))
    }

    fn append(&self, file: &str, records: &[PersistedCommand]) -> Result<(), StateError> {
        let _guard = self.io.lock();
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))?;
        for record in records {
            let line = serde_json::to_string(record)?;
            writeln!(out, "{line}")?;
        }
        out.flush()?;
        Ok(())
    }

    fn persistable(command: &Command<H>) -> Result<PersistedCommand, StateError> {
        let record = PersistedCommand::from_command(command, None);
        if record.payload.is_none() {
            return Err(StateError::NotPersistable(record.kind));
        }
        Ok(record)
    }
}

#[async_trait]
impl<H> StateProvider<H> for JsonlStateProvider<H>
where
    H: Send + Sync + 'static,
{
    async fn save_command(&self, command: Command<H>) -> Result<(), StateError> {
        let record = Self::persistable(&command)?;
        self.append(COMMANDS_FILE, &[record])
    }

    async fn save_commands(&self, commands: Vec<Command<H>>) -> Vec<RejectedCommand<H>> {
        let mut records = Vec::with_capacity(commands.len());
        let mut stored = Vec::with_capacity(commands.len());
        let mut rejected = Vec::new();
        for command in commands {
            match Self::persistable(&command) {
                Ok(record) => {
                    records.push(record);
                    stored.push(command);
                }
                Err(error) => rejected.push(RejectedCommand { command, error }),
            }
        }
        if let Err(e) = self.append(COMMANDS_FILE, &records) {
            // Handed back for one-by-one retries; a partial write may duplicate.
            let reason = e.to_string();
            rejected.extend(stored.into_iter().map(|command| RejectedCommand {
                command,
                error: StateError::Backend(format!("batch append failed: {reason}")),
            }));
        }
        rejected
    }

    async fn save_problem_command(
        &self,
        command: Command<H>,
        problem: CommandProblem,
    ) -> Result<(), StateError> {
        let record = PersistedCommand::from_command(&command, Some(problem));
        self.append(PROBLEMS_FILE, &[record])
    }

    /// Records that cannot be decoded stay in the file and are skipped.
    async fn load_commands(&self, limit: Option<usize>) -> Result<Vec<Command<H>>, StateError> {
        let _guard = self.io.lock();
        let path = self.dir.join(COMMANDS_FILE);
        let records = read_records(&path)?;
        let limit = limit.unwrap_or(usize::MAX);

        let mut loaded = Vec::new();
        let mut kept = Vec::new();
        for record in records {
            if loaded.len() >= limit {
                kept.push(record);
                continue;
            }
            match self.registry.decode(&record) {
                Ok(command) => loaded.push(command),
                Err(e) => {
                    warn!(command_id = %record.id, error = %e, "skipping undecodable command");
                    kept.push(record);
                }
            }
        }

        // Swap in the remainder with a rename so a crash keeps either file whole.
        let mut out = NamedTempFile::new_in(&self.dir)?;
        for record in &kept {
            let line = serde_json::to_string(record)?;
            writeln!(out, "{line}")?;
        }
        out.as_file().sync_all()?;
        out.persist(&path).map_err(|e| StateError::Io(e.error))?;
        Ok(loaded)
    }
}

fn read_records(path: &Path) -> Result<Vec<PersistedCommand>, StateError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(OpenOptions::new().read(true).open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}
