//! Continuation-token lifecycle.
//!
//! The external agent can resume prior context across iterations via an
//! opaque session token. This module owns that token: creation, use,
//! expiry, and reset, independent of breaker or aggregator state. Token
//! format is a millisecond creation timestamp plus a random suffix, unique
//! across restarts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::storage;

/// Filename for the session record.
pub const SESSION_FILENAME: &str = "session.json";

/// Filename for the session transition history.
pub const SESSION_HISTORY_FILENAME: &str = "session_history.json";

/// Maximum retained session transition records.
pub const MAX_SESSION_HISTORY: usize = 50;

/// Persisted session record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    /// Opaque continuation token; empty after a reset.
    pub session_id: String,
    /// When the token was created.
    pub created_at: DateTime<Utc>,
    /// When the token was last used.
    pub last_used: DateTime<Utc>,
    /// When the session was last reset, if ever.
    pub reset_at: Option<DateTime<Utc>>,
    /// Why the session was last reset, if ever.
    pub reset_reason: Option<String>,
}

impl SessionRecord {
    /// Creates a record with a freshly generated token.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            session_id: generate_token(now),
            created_at: now,
            last_used: now,
            reset_at: None,
            reset_reason: None,
        }
    }
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// One entry in the session transition history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionTransitionRecord {
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
    /// State before the transition.
    pub from_state: String,
    /// State after the transition.
    pub to_state: String,
    /// Why the transition happened.
    pub reason: String,
    /// Loop index at the time of the transition.
    pub loop_number: u32,
}

/// Generates an opaque token: monotonic millisecond timestamp + random suffix.
fn generate_token(at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", at.timestamp_millis(), &suffix[..8])
}

/// Owns the continuation token and its transition history.
#[derive(Debug)]
pub struct SessionLifecycleManager {
    record: Option<SessionRecord>,
    expiry_hours: i64,
    record_path: PathBuf,
    history_path: PathBuf,
    recovered_from_corruption: bool,
}

impl SessionLifecycleManager {
    /// Loads the manager without creating a session.
    ///
    /// # Errors
    ///
    /// Returns an error only for unexpected I/O failures.
    pub fn load<P: AsRef<Path>>(state_dir: P, expiry_hours: i64) -> Result<Self> {
        let state_dir = state_dir.as_ref();
        let record_path = state_dir.join(SESSION_FILENAME);
        let existed = record_path.exists();
        let record: Option<SessionRecord> = storage::load_json(&record_path)?;
        let recovered_from_corruption = existed && record.is_none();
        Ok(Self {
            record,
            expiry_hours,
            record_path,
            history_path: state_dir.join(SESSION_HISTORY_FILENAME),
            recovered_from_corruption,
        })
    }

    /// Ensures a session record exists, creating one if missing.
    ///
    /// A corrupted record file was already discarded at load time; recovery
    /// from that state is logged as a `corrupted_file_recovery` transition.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be persisted.
    pub fn initialize(&mut self) -> Result<&SessionRecord> {
        if self.record.is_none() {
            let record = SessionRecord::new();
            info!("Created session {}", record.session_id);

            if self.recovered_from_corruption {
                warn!("Session record was corrupted; recreated");
                self.append_transition("corrupt", "active", "corrupted_file_recovery", 0)?;
            } else {
                self.append_transition("none", "active", "created", 0)?;
            }

            storage::save_json(&self.record_path, &record)?;
            self.record = Some(record);
        }
        self.record
            .as_ref()
            .ok_or_else(|| crate::error::VigilError::session("record missing after initialize"))
    }

    /// The current token, if a non-reset session exists.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.record
            .as_ref()
            .map(|r| r.session_id.as_str())
            .filter(|t| !t.is_empty())
    }

    /// Whether the stored token may still be used for resumption.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        self.is_resumable_at(Utc::now())
    }

    fn is_resumable_at(&self, now: DateTime<Utc>) -> bool {
        let Some(record) = &self.record else {
            return false;
        };
        if record.session_id.is_empty() {
            return false;
        }
        now - record.last_used < Duration::hours(self.expiry_hours)
    }

    /// Marks the token as used now.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be persisted.
    pub fn touch(&mut self) -> Result<()> {
        if let Some(record) = &mut self.record {
            record.last_used = Utc::now();
            storage::save_json(&self.record_path, record)?;
        }
        Ok(())
    }

    /// Resets the session: zeroes the token and records the transition.
    ///
    /// # Errors
    ///
    /// Returns an error if the record or history cannot be persisted.
    pub fn reset(&mut self, reason: &str, loop_index: u32) -> Result<()> {
        let from_state = if self.token().is_some() {
            "active"
        } else {
            "none"
        };

        if let Some(record) = &mut self.record {
            record.session_id = String::new();
            record.reset_at = Some(Utc::now());
            record.reset_reason = Some(reason.to_string());
            storage::save_json(&self.record_path, record)?;
        }

        info!("Session reset at loop {loop_index}: {reason}");
        self.append_transition(from_state, "reset", reason, loop_index)
    }

    /// Transition history, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error only for unexpected I/O failures.
    pub fn history(&self) -> Result<Vec<SessionTransitionRecord>> {
        Ok(storage::load_json(&self.history_path)?.unwrap_or_default())
    }

    fn append_transition(
        &self,
        from_state: &str,
        to_state: &str,
        reason: &str,
        loop_number: u32,
    ) -> Result<()> {
        let mut history = self.history()?;
        history.push(SessionTransitionRecord {
            timestamp: Utc::now(),
            from_state: from_state.to_string(),
            to_state: to_state.to_string(),
            reason: reason.to_string(),
            loop_number,
        });
        if history.len() > MAX_SESSION_HISTORY {
            let excess = history.len() - MAX_SESSION_HISTORY;
            history.drain(..excess);
        }
        storage::save_json(&self.history_path, &history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(temp: &TempDir) -> SessionLifecycleManager {
        SessionLifecycleManager::load(temp.path(), 24).unwrap()
    }

    #[test]
    fn initialize_creates_unique_tokens() {
        let temp = TempDir::new().unwrap();
        let mut m = manager(&temp);
        let first = m.initialize().unwrap().session_id.clone();
        assert!(!first.is_empty());
        assert!(first.contains('-'));

        let temp2 = TempDir::new().unwrap();
        let mut m2 = manager(&temp2);
        let second = m2.initialize().unwrap().session_id.clone();
        assert_ne!(first, second);
    }

    #[test]
    fn initialize_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let mut m = manager(&temp);
        let first = m.initialize().unwrap().session_id.clone();
        let again = m.initialize().unwrap().session_id.clone();
        assert_eq!(first, again);
    }

    #[test]
    fn session_survives_restart() {
        let temp = TempDir::new().unwrap();
        let token = {
            let mut m = manager(&temp);
            m.initialize().unwrap().session_id.clone()
        };

        let m = manager(&temp);
        assert_eq!(m.token(), Some(token.as_str()));
    }

    #[test]
    fn corrupted_record_recovers_with_transition() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(SESSION_FILENAME), "{{{{").unwrap();

        let mut m = manager(&temp);
        m.initialize().unwrap();
        assert!(m.token().is_some());

        let history = m.history().unwrap();
        assert!(history
            .iter()
            .any(|t| t.reason == "corrupted_file_recovery"));
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let mut m = manager(&temp);
        m.initialize().unwrap();

        let created = m.record.as_ref().unwrap().last_used;
        // One minute before expiry: still resumable.
        assert!(m.is_resumable_at(created + Duration::hours(24) - Duration::minutes(1)));
        // At exactly the expiry boundary: no longer resumable.
        assert!(!m.is_resumable_at(created + Duration::hours(24)));
    }

    #[test]
    fn not_resumable_without_record() {
        let temp = TempDir::new().unwrap();
        let m = manager(&temp);
        assert!(!m.is_resumable());
    }

    #[test]
    fn touch_extends_resumability() {
        let temp = TempDir::new().unwrap();
        let mut m = manager(&temp);
        m.initialize().unwrap();

        // Simulate an old last_used, then touch.
        m.record.as_mut().unwrap().last_used = Utc::now() - Duration::hours(30);
        assert!(!m.is_resumable());

        m.touch().unwrap();
        assert!(m.is_resumable());
    }

    #[test]
    fn reset_zeroes_token_and_records_transition() {
        let temp = TempDir::new().unwrap();
        let mut m = manager(&temp);
        m.initialize().unwrap();
        assert!(m.token().is_some());

        m.reset("interrupted", 7).unwrap();
        assert!(m.token().is_none());
        assert!(!m.is_resumable());

        let record = m.record.as_ref().unwrap();
        assert_eq!(record.reset_reason.as_deref(), Some("interrupted"));
        assert!(record.reset_at.is_some());

        let last = m.history().unwrap().pop().unwrap();
        assert_eq!(last.from_state, "active");
        assert_eq!(last.to_state, "reset");
        assert_eq!(last.reason, "interrupted");
        assert_eq!(last.loop_number, 7);
    }

    #[test]
    fn history_capped_at_fifty() {
        let temp = TempDir::new().unwrap();
        let mut m = manager(&temp);
        m.initialize().unwrap();

        for i in 0..60 {
            m.reset("cycling", i).unwrap();
        }

        let history = m.history().unwrap();
        assert_eq!(history.len(), MAX_SESSION_HISTORY);
        assert_eq!(history.last().unwrap().loop_number, 59);
    }
}
