//! Deadline-bound agent invocation.
//!
//! The agent runs as a cancellable task under a hard wall-clock deadline.
//! While it runs, the orchestrator ticks a progress report to the display
//! roughly every ten seconds; the reporting never blocks the countdown.
//! A deadline hit cancels the task (reaping the worker) and is always
//! classified as a timeout - partial output is never merged into success.

use std::time::Duration;

use tracing::warn;

use crate::error::Result;
use crate::testing::{AgentOutput, AgentRunner, ProgressDisplay};

/// Interval between progress reports while the agent runs.
const PROGRESS_TICK: Duration = Duration::from_secs(10);

/// Phrases by which the external agent reports its own usage limit.
const RATE_LIMIT_PHRASES: &[&str] = &[
    "usage limit reached",
    "rate limit reached",
    "rate limit exceeded",
    "too many requests",
];

/// Classified outcome of one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    /// The agent exited cleanly; output captured.
    Success(AgentOutput),
    /// The deadline expired; the worker was cancelled.
    Timeout,
    /// The agent reported its own usage limit.
    RateLimited(AgentOutput),
    /// Any other failure (nonzero exit, spawn error).
    Failed(String),
}

impl InvocationOutcome {
    /// Best-effort output text for analysis, empty for timeouts.
    #[must_use]
    pub fn output_text(&self) -> &str {
        match self {
            InvocationOutcome::Success(out) | InvocationOutcome::RateLimited(out) => &out.stdout,
            InvocationOutcome::Timeout => "",
            InvocationOutcome::Failed(message) => message,
        }
    }

    /// Whether this outcome counts as an error for the breaker.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            InvocationOutcome::Timeout | InvocationOutcome::Failed(_)
        )
    }
}

/// True when the output carries known limit-reached phrasing.
#[must_use]
pub fn mentions_rate_limit(output: &str) -> bool {
    let lower = output.to_lowercase();
    RATE_LIMIT_PHRASES.iter().any(|p| lower.contains(p))
}

/// Runs one agent invocation under the deadline, reporting progress ticks.
///
/// # Errors
///
/// Infallible in practice; failures are folded into the returned outcome so
/// the loop can apply its backoff policy uniformly.
pub async fn run_with_deadline(
    agent: &dyn AgentRunner,
    prompt: &str,
    resume: Option<&str>,
    deadline: Duration,
    display: &dyn ProgressDisplay,
) -> Result<InvocationOutcome> {
    let deadline_at = tokio::time::Instant::now() + deadline;
    let invocation = agent.run_iteration(prompt, resume);
    tokio::pin!(invocation);

    let mut ticker = tokio::time::interval(PROGRESS_TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // Consume the immediate first tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            result = &mut invocation => {
                return Ok(classify(result));
            }
            _ = tokio::time::sleep_until(deadline_at) => {
                // Dropping the pinned future cancels the worker; runners
                // spawn children with kill-on-drop so the process is reaped.
                warn!("Agent invocation hit {}s deadline", deadline.as_secs());
                return Ok(InvocationOutcome::Timeout);
            }
            _ = ticker.tick() => {
                let remaining = deadline_at
                    .saturating_duration_since(tokio::time::Instant::now());
                display.wait_tick(remaining.as_secs(), "agent running");
            }
        }
    }
}

fn classify(result: Result<AgentOutput>) -> InvocationOutcome {
    match result {
        Ok(output) => {
            if mentions_rate_limit(&output.stdout) {
                InvocationOutcome::RateLimited(output)
            } else if output.succeeded() {
                InvocationOutcome::Success(output)
            } else {
                InvocationOutcome::Failed(format!(
                    "agent exited with code {}: {}",
                    output.exit_code,
                    output.stdout.chars().take(200).collect::<String>()
                ))
            }
        }
        Err(e) => InvocationOutcome::Failed(e.to_string()),
    }
}
