//! Session events for front ends.
//!
//! A [`BackupSession`](crate::executor::BackupSession) publishes its phase
//! changes, per-folder milestones and copy progress on a broadcast channel.
//! Any number of observers (CLI, GUI bridge, tests) can subscribe; a session
//! without subscribers simply drops its events.

use crate::executor::report::ExitStatus;
use crate::executor::Phase;
use crate::progress::CopyProgress;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Maximum number of queued events per subscriber
const BROADCAST_CAPACITY: usize = 1000;

/// Events emitted during a backup session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SessionEvent {
    /// The session entered a new phase
    #[serde(rename = "session:phase")]
    PhaseChanged { session_id: String, phase: Phase },

    /// Copy of a logical folder started
    #[serde(rename = "folder:started")]
    FolderStarted { folder: String },

    /// Copy progress for the current folder
    #[serde(rename = "folder:progress")]
    Progress(CopyProgress),

    /// Copy of a logical folder finished
    #[serde(rename = "folder:finished")]
    FolderFinished {
        folder: String,
        copied: usize,
        skipped: usize,
        failed: usize,
        bytes_copied: u64,
    },

    /// A planned folder was left out
    #[serde(rename = "folder:skipped")]
    FolderSkipped { folder: String, reason: String },

    /// Session reached `Complete`
    #[serde(rename = "session:completed")]
    SessionCompleted {
        session_id: String,
        exit_status: ExitStatus,
        files_copied: usize,
        bytes_copied: u64,
    },

    /// Session reached `Failed`
    #[serde(rename = "session:failed")]
    SessionFailed { session_id: String, error: String },
}

/// Broadcast hub for [`SessionEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; a bus without subscribers drops it.
    pub fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            trace!("No event subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
