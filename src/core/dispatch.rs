//! Dispatch queue: pending commands, idle workers and the wake signal that
//! lets the dispatch loop pair them.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::core::{BrowserWorker, Command};
use crate::util::serde::WorkerId;

/// Pending-work FIFO plus the idle-worker stack.
///
/// The command side is a crossbeam channel, so pushes from any task never
/// need an outer lock; a bounded channel enforces the queue limit atomically.
/// Idle workers sit in a LIFO stack: the most recently used session is reused
/// first and the others age toward idle retirement.
pub(crate) struct DispatchQueue<H> {
    commands_tx: Sender<Command<H>>,
    commands_rx: Receiver<Command<H>>,
    idle: Mutex<Vec<Arc<BrowserWorker<H>>>>,
    wake: Notify,
}

impl<H> DispatchQueue<H> {
    pub(crate) fn new(limit: Option<usize>) -> Self {
        let (commands_tx, commands_rx) = match limit {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        };
        Self {
            commands_tx,
            commands_rx,
            idle: Mutex::new(Vec::new()),
            wake: Notify::new(),
        }
    }

    /// Append at the back. Hands the command back when the queue is full.
    pub(crate) fn push_command(&self, command: Command<H>) -> Result<(), Command<H>> {
        match self.commands_tx.try_send(command) {
            Ok(()) => {
                self.wake.notify_one();
                Ok(())
            }
            Err(TrySendError::Full(command) | TrySendError::Disconnected(command)) => Err(command),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.commands_rx.len()
    }

    pub(crate) fn drain_commands(&self) -> Vec<Command<H>> {
        self.commands_rx.try_iter().collect()
    }

    /// Return a worker to the idle set, dropping the caller's claim on it.
    ///
    /// The claim is released under the idle lock, so a worker is never seen
    /// unclaimed while it is neither idle nor held.
    pub(crate) fn push_worker(&self, worker: Arc<BrowserWorker<H>>) {
        let mut idle = self.idle.lock();
        worker.release_claim();
        if worker.is_evicted() {
            return;
        }
        idle.push(worker);
        drop(idle);
        self.wake.notify_one();
    }

    /// Remove and claim a specific idle worker. `None` when it is not idle
    /// or someone else holds it.
    pub(crate) fn take_worker(&self, id: WorkerId) -> Option<Arc<BrowserWorker<H>>> {
        let mut idle = self.idle.lock();
        let position = idle.iter().position(|w| w.id() == id)?;
        if !idle[position].try_claim() {
            return None;
        }
        Some(idle.remove(position))
    }

    pub(crate) fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }

    pub(crate) fn clear_workers(&self) -> Vec<Arc<BrowserWorker<H>>> {
        std::mem::take(&mut *self.idle.lock())
    }

    /// Claim one idle worker and one command together, or neither. The
    /// worker comes back with its busy flag already set.
    pub(crate) fn try_pair(&self) -> Option<(Arc<BrowserWorker<H>>, Command<H>)> {
        let mut idle = self.idle.lock();
        idle.retain(|w| !w.is_evicted());
        if self.commands_rx.is_empty() {
            return None;
        }
        // Newest first; a worker someone else claimed stays put.
        let position = idle.iter().rposition(|w| w.try_claim())?;
        if let Ok(command) = self.commands_rx.try_recv() {
            Some((idle.remove(position), command))
        } else {
            idle[position].release_claim();
            None
        }
    }

    /// Park until something was enqueued or returned, or `timeout` elapsed.
    pub(crate) async fn wait(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.wake.notified()).await;
    }
}
