//! Stagnation-detecting circuit breaker.
//!
//! A 3-state machine that watches per-loop results and decides whether the
//! automation loop may keep running. Two streaks feed it: consecutive loops
//! with no file changes, and consecutive loops that surfaced errors.
//!
//! ```text
//! Closed ──no progress x2──> HalfOpen ──progress──> Closed
//!   │                           │
//!   ├──no progress x3──────────┐├──no progress x3──┐
//!   └──same error x5──────────>└────────────────> Open (manual reset only)
//! ```

pub mod persistence;
pub mod types;

use std::path::Path;

use chrono::Utc;
use tracing::{info, warn};

pub use persistence::{BreakerPersistence, MAX_HISTORY_ENTRIES};
pub use types::{BreakerState, CircuitState, LoopResultEvent, TransitionRecord};

/// No-progress streak that moves `Closed` into `HalfOpen`.
pub const HALF_OPEN_THRESHOLD: u32 = 2;

/// No-progress streak that opens the breaker.
pub const NO_PROGRESS_THRESHOLD: u32 = 3;

/// Error streak that opens the breaker.
pub const SAME_ERROR_THRESHOLD: u32 = 5;

/// The stagnation circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    persistence: BreakerPersistence,
}

impl CircuitBreaker {
    /// Loads the breaker from the state directory. Missing or corrupted
    /// storage reinitializes to closed with zeroed counters.
    ///
    /// # Errors
    ///
    /// Returns an error only for unexpected I/O failures.
    pub fn load<P: AsRef<Path>>(state_dir: P) -> Result<Self, crate::error::VigilError> {
        let persistence = BreakerPersistence::new(state_dir);
        let state = persistence.load_state()?;
        Ok(Self { state, persistence })
    }

    /// Current machine state.
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.state.state
    }

    /// Full persisted record (read-only).
    #[must_use]
    pub fn state(&self) -> &BreakerState {
        &self.state
    }

    /// Whether further iterations are permitted.
    #[must_use]
    pub fn can_continue(&self) -> bool {
        self.state.state != CircuitState::Open
    }

    /// Feeds one loop result through the transition table.
    ///
    /// Returns the resulting state and whether execution may continue.
    ///
    /// # Errors
    ///
    /// Returns an error if the updated state cannot be persisted.
    pub fn record_loop_result(
        &mut self,
        event: LoopResultEvent,
    ) -> Result<(CircuitState, bool), crate::error::VigilError> {
        let has_progress = event.files_changed > 0;

        if has_progress {
            self.state.consecutive_no_progress = 0;
            self.state.last_progress_loop = event.loop_index;
        } else {
            self.state.consecutive_no_progress += 1;
        }

        if event.has_errors {
            self.state.consecutive_same_error += 1;
        } else {
            self.state.consecutive_same_error = 0;
        }

        self.state.current_loop = event.loop_index;

        let previous = self.state.state;
        let (next, reason) = self.next_state(previous, has_progress);

        if next != previous {
            self.transition(previous, next, event.loop_index, reason)?;
        } else {
            self.persistence.save_state(&self.state)?;
        }

        Ok((self.state.state, self.can_continue()))
    }

    /// Transition table. First match wins.
    fn next_state(&self, current: CircuitState, has_progress: bool) -> (CircuitState, &'static str) {
        match current {
            CircuitState::Closed => {
                if self.state.consecutive_no_progress >= NO_PROGRESS_THRESHOLD {
                    (CircuitState::Open, "no progress")
                } else if self.state.consecutive_same_error >= SAME_ERROR_THRESHOLD {
                    (CircuitState::Open, "same error repeated")
                } else if self.state.consecutive_no_progress >= HALF_OPEN_THRESHOLD {
                    (CircuitState::HalfOpen, "monitoring")
                } else {
                    (CircuitState::Closed, "")
                }
            }
            CircuitState::HalfOpen => {
                if has_progress {
                    (CircuitState::Closed, "recovered")
                } else if self.state.consecutive_no_progress >= NO_PROGRESS_THRESHOLD {
                    (CircuitState::Open, "no recovery")
                } else {
                    (CircuitState::HalfOpen, "")
                }
            }
            // Open holds unconditionally; only a manual reset leaves it.
            CircuitState::Open => (CircuitState::Open, ""),
        }
    }

    fn transition(
        &mut self,
        from: CircuitState,
        to: CircuitState,
        loop_index: u32,
        reason: &str,
    ) -> Result<(), crate::error::VigilError> {
        if to == CircuitState::Open && from != CircuitState::Open {
            self.state.total_opens += 1;
            warn!(
                "Circuit breaker opened at loop {} ({}), open #{}",
                loop_index, reason, self.state.total_opens
            );
        } else {
            info!(
                "Circuit breaker {} -> {} at loop {} ({})",
                from, to, loop_index, reason
            );
        }

        self.state.state = to;
        self.state.last_change = Utc::now();
        self.state.reason = reason.to_string();

        self.persistence.append_transition(TransitionRecord {
            timestamp: self.state.last_change,
            loop_index,
            from_state: from,
            to_state: to,
            reason: reason.to_string(),
        })?;
        self.persistence.save_state(&self.state)
    }

    /// Manual reset back to closed.
    ///
    /// Zeroes every counter, including the lifetime `total_opens`; reset is
    /// a full reinitialization, not just a streak clear.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset cannot be persisted.
    pub fn reset(&mut self, reason: &str) -> Result<(), crate::error::VigilError> {
        let from = self.state.state;
        let loop_index = self.state.current_loop;

        self.state = BreakerState::new();
        self.state.reason = reason.to_string();
        self.state.current_loop = loop_index;

        info!("Circuit breaker manually reset at loop {loop_index}: {reason}");

        self.persistence.append_transition(TransitionRecord {
            timestamp: self.state.last_change,
            loop_index,
            from_state: from,
            to_state: CircuitState::Closed,
            reason: reason.to_string(),
        })?;
        self.persistence.save_state(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn event(loop_index: u32, files_changed: u32, has_errors: bool) -> LoopResultEvent {
        LoopResultEvent {
            loop_index,
            files_changed,
            has_errors,
            output_length: 100,
        }
    }

    fn breaker(temp: &TempDir) -> CircuitBreaker {
        CircuitBreaker::load(temp.path()).unwrap()
    }

    #[test]
    fn no_progress_walks_closed_half_open_open() {
        let temp = TempDir::new().unwrap();
        let mut b = breaker(&temp);

        let (state, cont) = b.record_loop_result(event(1, 0, false)).unwrap();
        assert_eq!(state, CircuitState::Closed);
        assert!(cont);
        assert_eq!(b.state().consecutive_no_progress, 1);

        let (state, cont) = b.record_loop_result(event(2, 0, false)).unwrap();
        assert_eq!(state, CircuitState::HalfOpen);
        assert!(cont);

        let (state, cont) = b.record_loop_result(event(3, 0, false)).unwrap();
        assert_eq!(state, CircuitState::Open);
        assert!(!cont);
        assert_eq!(b.state().total_opens, 1);
    }

    #[test]
    fn total_opens_increments_once_per_open_edge() {
        let temp = TempDir::new().unwrap();
        let mut b = breaker(&temp);

        for i in 1..=3 {
            b.record_loop_result(event(i, 0, false)).unwrap();
        }
        assert_eq!(b.state().total_opens, 1);

        // Repeated observations while open never increment again.
        for i in 4..=8 {
            let (state, cont) = b.record_loop_result(event(i, 0, false)).unwrap();
            assert_eq!(state, CircuitState::Open);
            assert!(!cont);
        }
        assert_eq!(b.state().total_opens, 1);
    }

    #[test]
    fn same_error_path_opens_despite_progress() {
        let temp = TempDir::new().unwrap();
        let mut b = breaker(&temp);

        // Files change every loop, so the no-progress streak never grows,
        // but five straight error loops still trip the breaker.
        for i in 1..=4 {
            let (state, _) = b.record_loop_result(event(i, 2, true)).unwrap();
            assert_ne!(state, CircuitState::Open, "loop {i}");
        }
        let (state, cont) = b.record_loop_result(event(5, 2, true)).unwrap();
        assert_eq!(state, CircuitState::Open);
        assert!(!cont);
        assert_eq!(b.state().reason, "same error repeated");
    }

    #[test]
    fn half_open_recovers_on_progress() {
        let temp = TempDir::new().unwrap();
        let mut b = breaker(&temp);

        b.record_loop_result(event(1, 0, false)).unwrap();
        b.record_loop_result(event(2, 0, false)).unwrap();
        assert_eq!(b.circuit_state(), CircuitState::HalfOpen);

        let (state, cont) = b.record_loop_result(event(3, 3, false)).unwrap();
        assert_eq!(state, CircuitState::Closed);
        assert!(cont);
        assert_eq!(b.state().consecutive_no_progress, 0);
        assert_eq!(b.state().last_progress_loop, 3);
        assert_eq!(b.state().reason, "recovered");
    }

    #[test]
    fn open_is_terminal_without_manual_reset() {
        let temp = TempDir::new().unwrap();
        let mut b = breaker(&temp);

        for i in 1..=3 {
            b.record_loop_result(event(i, 0, false)).unwrap();
        }
        assert_eq!(b.circuit_state(), CircuitState::Open);

        // Even a loop with progress and no errors cannot close it.
        let (state, cont) = b.record_loop_result(event(4, 10, false)).unwrap();
        assert_eq!(state, CircuitState::Open);
        assert!(!cont);
    }

    #[test]
    fn reset_zeroes_total_opens() {
        let temp = TempDir::new().unwrap();
        let mut b = breaker(&temp);

        for i in 1..=3 {
            b.record_loop_result(event(i, 0, false)).unwrap();
        }
        assert_eq!(b.state().total_opens, 1);

        b.reset("operator reset").unwrap();
        assert_eq!(b.circuit_state(), CircuitState::Closed);
        assert_eq!(b.state().consecutive_no_progress, 0);
        assert_eq!(b.state().consecutive_same_error, 0);
        // Reset is a full reinitialization: the lifetime counter goes too.
        assert_eq!(b.state().total_opens, 0);
        assert!(b.can_continue());
    }

    #[test]
    fn state_survives_restart() {
        let temp = TempDir::new().unwrap();
        {
            let mut b = breaker(&temp);
            b.record_loop_result(event(1, 0, false)).unwrap();
            b.record_loop_result(event(2, 0, false)).unwrap();
        }

        let b = breaker(&temp);
        assert_eq!(b.circuit_state(), CircuitState::HalfOpen);
        assert_eq!(b.state().consecutive_no_progress, 2);
    }

    #[test]
    fn corrupted_state_reinitializes() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(persistence::STATE_FILENAME),
            "not json at all",
        )
        .unwrap();

        let b = breaker(&temp);
        assert_eq!(b.circuit_state(), CircuitState::Closed);
        assert_eq!(b.state().total_opens, 0);
    }

    #[test]
    fn transitions_are_recorded() {
        let temp = TempDir::new().unwrap();
        let mut b = breaker(&temp);

        for i in 1..=3 {
            b.record_loop_result(event(i, 0, false)).unwrap();
        }

        let history = b.persistence.load_history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].to_state, CircuitState::HalfOpen);
        assert_eq!(history[0].reason, "monitoring");
        // The third no-progress loop leaves HalfOpen, not Closed.
        assert_eq!(history[1].from_state, CircuitState::HalfOpen);
        assert_eq!(history[1].to_state, CircuitState::Open);
        assert_eq!(history[1].reason, "no recovery");
    }

    #[test]
    fn error_streak_resets_on_clean_loop() {
        let temp = TempDir::new().unwrap();
        let mut b = breaker(&temp);

        b.record_loop_result(event(1, 1, true)).unwrap();
        b.record_loop_result(event(2, 1, true)).unwrap();
        assert_eq!(b.state().consecutive_same_error, 2);

        b.record_loop_result(event(3, 1, false)).unwrap();
        assert_eq!(b.state().consecutive_same_error, 0);
    }
}
