//! Breaker state and transition-history storage.

use std::path::{Path, PathBuf};

use crate::breaker::types::{BreakerState, TransitionRecord};
use crate::error::Result;
use crate::storage;

/// Filename for the breaker state document.
pub const STATE_FILENAME: &str = "circuit_state.json";

/// Filename for the transition history.
pub const HISTORY_FILENAME: &str = "circuit_history.json";

/// Maximum retained transition records. The history is an operational audit
/// aid, not an unbounded ledger; oldest entries rotate out.
pub const MAX_HISTORY_ENTRIES: usize = 200;

/// Persistence layer for the circuit breaker.
#[derive(Debug, Clone)]
pub struct BreakerPersistence {
    state_path: PathBuf,
    history_path: PathBuf,
}

impl BreakerPersistence {
    /// Creates a persistence handler rooted at the state directory.
    #[must_use]
    pub fn new<P: AsRef<Path>>(state_dir: P) -> Self {
        let state_dir = state_dir.as_ref();
        Self {
            state_path: state_dir.join(STATE_FILENAME),
            history_path: state_dir.join(HISTORY_FILENAME),
        }
    }

    /// Loads the breaker state, falling back to the documented default when
    /// the file is missing or corrupted.
    ///
    /// # Errors
    ///
    /// Returns an error only for unexpected I/O failures.
    pub fn load_state(&self) -> Result<BreakerState> {
        Ok(storage::load_json(&self.state_path)?.unwrap_or_default())
    }

    /// Saves the breaker state.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_state(&self, state: &BreakerState) -> Result<()> {
        storage::save_json(&self.state_path, state)
    }

    /// Loads the transition history; corrupt or missing yields empty.
    ///
    /// # Errors
    ///
    /// Returns an error only for unexpected I/O failures.
    pub fn load_history(&self) -> Result<Vec<TransitionRecord>> {
        Ok(storage::load_json(&self.history_path)?.unwrap_or_default())
    }

    /// Appends a transition record, rotating out the oldest entries beyond
    /// [`MAX_HISTORY_ENTRIES`].
    ///
    /// # Errors
    ///
    /// Returns an error if the history cannot be written.
    pub fn append_transition(&self, record: TransitionRecord) -> Result<()> {
        let mut history = self.load_history()?;
        history.push(record);
        if history.len() > MAX_HISTORY_ENTRIES {
            let excess = history.len() - MAX_HISTORY_ENTRIES;
            history.drain(..excess);
        }
        storage::save_json(&self.history_path, &history)
    }

    /// Path to the state file.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }
}
