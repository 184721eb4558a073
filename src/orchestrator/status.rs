//! Per-iteration status snapshots for external monitoring.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage;

/// Filename for the status snapshot.
pub const STATUS_FILENAME: &str = "status.json";

/// Point-in-time view of the loop, written once per iteration and at
/// shutdown. Consumed by the monitoring collaborator; never read back by
/// the loop itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Iterations completed so far.
    pub loop_count: u32,
    /// Agent calls made in the current hour window.
    pub calls_made_this_hour: u32,
    /// Configured hourly budget.
    pub max_calls_per_hour: u32,
    /// What the loop last did (e.g. "agent_success", "backoff").
    pub last_action: String,
    /// Overall loop status: "running", "stopped", "halted".
    pub status: String,
    /// Exit reason when the loop stopped gracefully.
    pub exit_reason: Option<String>,
    /// When the rate window next resets.
    pub next_reset: DateTime<Utc>,
}

/// Writer for status snapshots.
#[derive(Debug, Clone)]
pub struct StatusWriter {
    path: PathBuf,
}

impl StatusWriter {
    /// Creates a writer rooted at the state directory.
    #[must_use]
    pub fn new<P: AsRef<Path>>(state_dir: P) -> Self {
        Self {
            path: state_dir.as_ref().join(STATUS_FILENAME),
        }
    }

    /// Writes a snapshot atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    pub fn write(&self, snapshot: &StatusSnapshot) -> Result<()> {
        storage::save_json(&self.path, snapshot)
    }

    /// Reads the latest snapshot, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error only for unexpected I/O failures.
    pub fn read(&self) -> Result<Option<StatusSnapshot>> {
        storage::load_json(&self.path)
    }
}
