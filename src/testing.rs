//! Collaborator traits and mock implementations.
//!
//! The orchestrator talks to the outside world only through these seams:
//! the agent process, the version-control diff, the task checklist, the
//! display, and the operator. Real implementations live in
//! [`crate::orchestrator::operations`]; the mocks here drive unit and
//! integration tests without spawning processes.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Result, VigilError};

/// Raw result of one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutput {
    /// Captured stdout of the agent process.
    pub stdout: String,
    /// Process exit code.
    pub exit_code: i32,
}

impl AgentOutput {
    /// True when the process exited cleanly.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Checklist completion counts reported by the task-list collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecklistCounts {
    /// Total tracked items.
    pub total: u32,
    /// Items marked complete.
    pub checked: u32,
}

impl ChecklistCounts {
    /// True when every tracked item is complete and at least one exists.
    #[must_use]
    pub fn all_complete(&self) -> bool {
        self.total > 0 && self.checked == self.total
    }
}

/// Operator decision when the external agent reports its own rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorChoice {
    /// Wait for the window to reset, then continue.
    Wait,
    /// Abort the loop.
    Abort,
}

/// Invokes the external coding agent for one iteration.
///
/// Implementations must not enforce a deadline themselves; the orchestrator
/// wraps the call in a cancellable deadline and reaps the worker on expiry.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Runs one iteration with the given prompt, optionally resuming a
    /// prior session via its continuation token.
    async fn run_iteration(&self, prompt: &str, resume: Option<&str>) -> Result<AgentOutput>;
}

/// Reports the number of files changed in the working tree.
pub trait ChangeCounter: Send + Sync {
    /// Count of changed files since the last iteration.
    fn changed_files(&self) -> Result<u32>;
}

/// Reports checklist completion from the tracked plan.
pub trait TaskListSource: Send + Sync {
    /// Current checklist counts, if a plan is tracked.
    fn checklist(&self) -> Result<Option<ChecklistCounts>>;
}

/// Receives human-facing progress output. Must never block the caller.
pub trait ProgressDisplay: Send + Sync {
    /// One-line status update.
    fn status_line(&self, message: &str);

    /// Periodic tick while waiting on a deadline or window reset.
    fn wait_tick(&self, remaining_secs: u64, message: &str);
}

/// Escalation point for decisions only a human can make.
pub trait OperatorPrompt: Send + Sync {
    /// Ask whether to wait out an external rate limit or abort.
    fn wait_or_abort(&self, message: &str) -> Result<OperatorChoice>;
}

// =============================================================================
// Mock implementations
// =============================================================================

/// Scripted agent: pops one queued output per invocation.
#[derive(Debug, Default)]
pub struct MockAgent {
    outputs: Mutex<VecDeque<AgentOutput>>,
    /// Prompts seen, most recent last.
    pub calls: Mutex<Vec<String>>,
}

impl MockAgent {
    /// Creates an empty mock agent.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful invocation with the given stdout.
    pub fn push_output(&self, stdout: impl Into<String>) {
        self.outputs.lock().unwrap().push_back(AgentOutput {
            stdout: stdout.into(),
            exit_code: 0,
        });
    }

    /// Queues an invocation with an explicit exit code.
    pub fn push_exit(&self, stdout: impl Into<String>, exit_code: i32) {
        self.outputs.lock().unwrap().push_back(AgentOutput {
            stdout: stdout.into(),
            exit_code,
        });
    }

    /// Number of invocations made so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentRunner for MockAgent {
    async fn run_iteration(&self, prompt: &str, _resume: Option<&str>) -> Result<AgentOutput> {
        self.calls.lock().unwrap().push(prompt.to_string());
        self.outputs
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| VigilError::loop_error("mock agent exhausted"))
    }
}

/// Scripted change counter: pops one queued count per call, repeating the
/// last value once exhausted.
#[derive(Debug, Default)]
pub struct MockChangeCounter {
    counts: Mutex<VecDeque<u32>>,
    last: Mutex<u32>,
}

impl MockChangeCounter {
    /// Creates a counter that always reports zero changes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a changed-file count for the next call.
    pub fn push_count(&self, count: u32) {
        self.counts.lock().unwrap().push_back(count);
    }
}

impl ChangeCounter for MockChangeCounter {
    fn changed_files(&self) -> Result<u32> {
        let mut counts = self.counts.lock().unwrap();
        if let Some(count) = counts.pop_front() {
            *self.last.lock().unwrap() = count;
            Ok(count)
        } else {
            Ok(*self.last.lock().unwrap())
        }
    }
}

/// Fixed-answer task list.
#[derive(Debug, Default)]
pub struct MockTaskList {
    counts: Mutex<Option<ChecklistCounts>>,
}

impl MockTaskList {
    /// Creates a task list with no tracked plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reported counts.
    pub fn set_counts(&self, total: u32, checked: u32) {
        *self.counts.lock().unwrap() = Some(ChecklistCounts { total, checked });
    }
}

impl TaskListSource for MockTaskList {
    fn checklist(&self) -> Result<Option<ChecklistCounts>> {
        Ok(*self.counts.lock().unwrap())
    }
}

/// Display that records messages instead of printing them.
#[derive(Debug, Default)]
pub struct RecordingDisplay {
    /// Status lines received.
    pub lines: Mutex<Vec<String>>,
}

impl RecordingDisplay {
    /// Creates an empty recording display.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressDisplay for RecordingDisplay {
    fn status_line(&self, message: &str) {
        self.lines.lock().unwrap().push(message.to_string());
    }

    fn wait_tick(&self, _remaining_secs: u64, _message: &str) {}
}

/// Operator that always answers the same way.
#[derive(Debug)]
pub struct MockOperator {
    choice: OperatorChoice,
}

impl MockOperator {
    /// Creates an operator with a fixed answer.
    #[must_use]
    pub fn new(choice: OperatorChoice) -> Self {
        Self { choice }
    }
}

impl OperatorPrompt for MockOperator {
    fn wait_or_abort(&self, _message: &str) -> Result<OperatorChoice> {
        Ok(self.choice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_agent_pops_in_order() {
        let agent = MockAgent::new();
        agent.push_output("first");
        agent.push_exit("second", 2);

        let a = agent.run_iteration("p1", None).await.unwrap();
        assert_eq!(
            a,
            AgentOutput {
                stdout: "first".to_string(),
                exit_code: 0
            }
        );
        assert!(a.succeeded());

        let b = agent.run_iteration("p2", Some("token")).await.unwrap();
        assert_eq!(b.exit_code, 2);
        assert!(!b.succeeded());

        assert_eq!(agent.call_count(), 2);
        assert!(agent.run_iteration("p3", None).await.is_err());
    }

    #[test]
    fn test_mock_change_counter_repeats_last() {
        let counter = MockChangeCounter::new();
        counter.push_count(3);
        assert_eq!(counter.changed_files().unwrap(), 3);
        assert_eq!(counter.changed_files().unwrap(), 3);
    }

    #[test]
    fn test_checklist_all_complete() {
        assert!(ChecklistCounts {
            total: 4,
            checked: 4
        }
        .all_complete());
        assert!(!ChecklistCounts {
            total: 4,
            checked: 3
        }
        .all_complete());
        assert!(!ChecklistCounts {
            total: 0,
            checked: 0
        }
        .all_complete());
    }

    #[test]
    fn test_mock_operator() {
        let op = MockOperator::new(OperatorChoice::Abort);
        assert_eq!(op.wait_or_abort("limit").unwrap(), OperatorChoice::Abort);
    }
}
