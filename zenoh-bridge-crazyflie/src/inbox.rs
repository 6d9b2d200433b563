//! Single-slot command inbox.
//!
//! The bus subscriber stages commands, the dispatch loop claims them. Only the
//! latest unclaimed command is kept: a new arrival replaces one that has not
//! been claimed yet, and the bus is never slowed down by a busy vehicle.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::command::Command;

/// Result of [`CommandInbox::stage`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StageOutcome {
    /// The slot was empty.
    Staged,
    /// An unclaimed command was displaced and dropped.
    Overwrote(Command),
}

#[derive(Debug)]
struct Staged {
    command: Command,
    source: String,
}

/// Last-write-wins mailbox between the bus and the dispatch loop.
#[derive(Debug, Default)]
pub struct CommandInbox {
    slot: Mutex<Option<Staged>>,
    staged: AtomicU64,
    overwrites: AtomicU64,
}

impl CommandInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `command`, replacing any unclaimed one.
    ///
    /// `source` names where the command came from (usually a key expression)
    /// and is only used for logging.
    pub fn stage(&self, command: Command, source: &str) -> StageOutcome {
        let previous = self.slot.lock().replace(Staged {
            command,
            source: source.to_string(),
        });
        self.staged.fetch_add(1, Ordering::Relaxed);

        match previous {
            Some(previous) => {
                self.overwrites.fetch_add(1, Ordering::Relaxed);
                info!(
                    dropped = %previous.command,
                    dropped_source = %previous.source,
                    command = %command,
                    source = %source,
                    "Unclaimed command overwritten"
                );
                StageOutcome::Overwrote(previous.command)
            }
            None => {
                debug!(command = %command, source = %source, "Command staged");
                StageOutcome::Staged
            }
        }
    }

    /// Take the pending command, if any. Never blocks on a producer.
    pub fn try_claim(&self) -> Option<Command> {
        self.slot.lock().take().map(|staged| staged.command)
    }

    /// Whether a command is waiting to be claimed.
    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Number of commands staged so far.
    pub fn staged(&self) -> u64 {
        self.staged.load(Ordering::Relaxed)
    }

    /// Number of unclaimed commands dropped by a newer arrival.
    pub fn overwrites(&self) -> u64 {
        self.overwrites.load(Ordering::Relaxed)
    }
}
