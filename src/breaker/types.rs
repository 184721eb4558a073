//! Circuit breaker state types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three breaker states.
///
/// `Open` is terminal: once the breaker opens, no further iterations are
/// permitted until an explicit manual reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Monitoring: progress has stalled but not long enough to trip.
    HalfOpen,
    /// Tripped: execution is not permitted.
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::HalfOpen => write!(f, "half_open"),
            CircuitState::Open => write!(f, "open"),
        }
    }
}

/// One loop's result as seen by the breaker.
#[derive(Debug, Clone, Copy)]
pub struct LoopResultEvent {
    /// Index of the loop that produced this result.
    pub loop_index: u32,
    /// Files changed during the loop.
    pub files_changed: u32,
    /// Whether the loop surfaced errors.
    pub has_errors: bool,
    /// Length of the agent's output in bytes.
    pub output_length: usize,
}

/// Persisted breaker state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakerState {
    /// Current state of the machine.
    pub state: CircuitState,
    /// When the state last changed.
    pub last_change: DateTime<Utc>,
    /// Consecutive loops without file changes.
    pub consecutive_no_progress: u32,
    /// Consecutive loops that surfaced errors.
    pub consecutive_same_error: u32,
    /// Last loop index at which progress was observed.
    pub last_progress_loop: u32,
    /// Lifetime count of transitions into `Open`.
    pub total_opens: u32,
    /// Reason for the most recent state change.
    pub reason: String,
    /// Most recently processed loop index.
    pub current_loop: u32,
}

impl BreakerState {
    /// The documented default: closed, all counters zeroed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            last_change: Utc::now(),
            consecutive_no_progress: 0,
            consecutive_same_error: 0,
            last_progress_loop: 0,
            total_opens: 0,
            reason: String::new(),
            current_loop: 0,
        }
    }
}

impl Default for BreakerState {
    fn default() -> Self {
        Self::new()
    }
}

/// One entry in the breaker's transition history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionRecord {
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
    /// Loop index at the time of the transition.
    #[serde(rename = "loop")]
    pub loop_index: u32,
    /// State before the transition.
    pub from_state: CircuitState,
    /// State after the transition.
    pub to_state: CircuitState,
    /// Why the transition happened.
    pub reason: String,
}
