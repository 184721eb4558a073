//! Loop orchestration.
//!
//! One iteration at a time: reset the rate window, touch the session, gate
//! on the circuit breaker and the call budget, check the exit aggregator,
//! then invoke the agent under its deadline and feed the classified result
//! back into the breaker and aggregator. The loop is strictly sequential;
//! an advisory lock keeps a second process off the same state directory.

pub mod deadline;
pub mod operations;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::analyzer::ResponseAnalyzer;
use crate::breaker::{CircuitBreaker, LoopResultEvent};
use crate::config::LoopConfig;
use crate::error::{Result, VigilError};
use crate::ratelimit::RateLimiter;
use crate::session::SessionLifecycleManager;
use crate::signals::{ExitReason, ExitSignalAggregator};
use crate::storage::StateLock;
use crate::testing::{
    AgentRunner, ChangeCounter, OperatorChoice, OperatorPrompt, ProgressDisplay, TaskListSource,
};

pub use deadline::InvocationOutcome;
pub use status::{StatusSnapshot, StatusWriter};

/// External collaborators the orchestrator composes.
pub struct Collaborators {
    /// The agent process.
    pub agent: Arc<dyn AgentRunner>,
    /// Version-control change counter.
    pub changes: Arc<dyn ChangeCounter>,
    /// Plan checklist reader.
    pub tasks: Arc<dyn TaskListSource>,
    /// Human-facing display.
    pub display: Arc<dyn ProgressDisplay>,
    /// Escalation point for operator decisions.
    pub operator: Arc<dyn OperatorPrompt>,
}

/// Drives the unattended supervisor loop.
pub struct LoopOrchestrator {
    config: LoopConfig,
    rate_limiter: RateLimiter,
    breaker: CircuitBreaker,
    analyzer: ResponseAnalyzer,
    aggregator: ExitSignalAggregator,
    session: SessionLifecycleManager,
    status: StatusWriter,
    collaborators: Collaborators,
    loop_count: u32,
    _lock: StateLock,
}

impl LoopOrchestrator {
    /// Builds the orchestrator, loading all persisted component state and
    /// acquiring the advisory state-directory lock.
    ///
    /// # Errors
    ///
    /// Fails fast on invalid configuration, a missing prompt source, or a
    /// state directory already locked by another loop process.
    pub fn new(config: LoopConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let state_dir = config.state_dir();
        let lock = StateLock::acquire(&state_dir)?;

        Ok(Self {
            rate_limiter: RateLimiter::load(&state_dir, config.max_calls_per_hour)?,
            breaker: CircuitBreaker::load(&state_dir)?,
            analyzer: ResponseAnalyzer::load(&state_dir)?,
            aggregator: ExitSignalAggregator::load(&state_dir)?,
            session: SessionLifecycleManager::load(&state_dir, config.session_expiry_hours)?,
            status: StatusWriter::new(&state_dir),
            config,
            collaborators,
            loop_count: 0,
            _lock: lock,
        })
    }

    /// Iterations completed so far in this process.
    #[must_use]
    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    /// Runs iterations until a graceful exit, a halt, or an abort.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::StagnationDetected`] when the circuit breaker
    /// opens and [`VigilError::OperatorAbort`] when the operator aborts an
    /// external rate-limit wait. Both require explicit action before a
    /// rerun makes sense.
    pub async fn run(&mut self) -> Result<ExitReason> {
        self.session.initialize()?;
        info!(
            "Starting loop: budget {}/h, deadline {}m, format {}",
            self.config.max_calls_per_hour, self.config.timeout_minutes, self.config.output_format
        );

        loop {
            let loop_index = self.loop_count + 1;

            self.rate_limiter.reset_if_new_window()?;
            self.session.touch()?;

            if !self.breaker.can_continue() {
                let reason = self.breaker.state().reason.clone();
                self.write_status("halted", "circuit_open", Some("stagnation_detected"))?;
                error!("Circuit breaker is open ({reason}); manual reset required");
                return Err(VigilError::StagnationDetected { loop_index, reason });
            }

            if !self.rate_limiter.can_make_call() {
                self.rate_limiter
                    .wait_for_window_reset(self.collaborators.display.as_ref())
                    .await?;
            }

            if let Some(reason) = self
                .aggregator
                .evaluate_exit(self.collaborators.tasks.as_ref())?
            {
                self.write_status("stopped", "graceful_exit", Some(&reason.to_string()))?;
                self.collaborators
                    .display
                    .status_line(&format!("work looks finished ({reason}), stopping"));
                return Ok(reason);
            }

            let outcome = self.run_iteration(loop_index).await?;
            self.loop_count = loop_index;

            match outcome {
                IterationEnd::Continue => {
                    tokio::time::sleep(Duration::from_secs(self.config.pause_secs)).await;
                }
                IterationEnd::Backoff => {
                    self.collaborators.display.status_line(&format!(
                        "iteration {loop_index} failed, backing off {}s",
                        self.config.backoff_secs
                    ));
                    tokio::time::sleep(Duration::from_secs(self.config.backoff_secs)).await;
                }
                IterationEnd::ExternalLimit => {
                    let choice = self.collaborators.operator.wait_or_abort(
                        "the agent reported its own usage limit; wait for reset or abort?",
                    )?;
                    match choice {
                        OperatorChoice::Wait => {
                            self.rate_limiter
                                .wait_for_window_reset(self.collaborators.display.as_ref())
                                .await?;
                        }
                        OperatorChoice::Abort => {
                            self.write_status("stopped", "operator_abort", None)?;
                            return Err(VigilError::OperatorAbort {
                                reason: "external usage limit".to_string(),
                            });
                        }
                    }
                }
                IterationEnd::Halted(reason) => {
                    self.write_status("halted", "circuit_open", Some("stagnation_detected"))?;
                    error!("Circuit breaker opened at loop {loop_index}: {reason}");
                    return Err(VigilError::StagnationDetected { loop_index, reason });
                }
            }
        }
    }

    /// One full iteration: invoke, analyze, record.
    async fn run_iteration(&mut self, loop_index: u32) -> Result<IterationEnd> {
        let prompt = std::fs::read_to_string(&self.config.prompt_path)?;
        let resume = if self.config.session_continuity && self.session.is_resumable() {
            self.session.token().map(str::to_string)
        } else {
            None
        };

        self.rate_limiter.record_call()?;
        info!(
            "Loop {loop_index}: invoking agent (call {}/{})",
            self.rate_limiter.calls_made(),
            self.rate_limiter.max_calls()
        );

        let outcome = deadline::run_with_deadline(
            self.collaborators.agent.as_ref(),
            &prompt,
            resume.as_deref(),
            self.config.iteration_deadline(),
            self.collaborators.display.as_ref(),
        )
        .await?;

        let output = outcome.output_text().to_string();
        let analysis =
            self.analyzer
                .analyze(loop_index, &output, self.collaborators.changes.as_ref())?;

        let has_errors = outcome.is_error() || analysis.is_stuck;
        let (_, can_continue) = self.breaker.record_loop_result(LoopResultEvent {
            loop_index,
            files_changed: analysis.files_modified,
            has_errors,
            output_length: analysis.output_length,
        })?;
        self.aggregator.record(&analysis)?;

        let last_action = match &outcome {
            InvocationOutcome::Success(_) => "agent_success",
            InvocationOutcome::Timeout => "agent_timeout",
            InvocationOutcome::RateLimited(_) => "agent_rate_limited",
            InvocationOutcome::Failed(_) => "agent_failure",
        };
        self.write_status("running", last_action, None)?;
        info!(
            "Loop {loop_index}: {} (files={}, confidence={}, summary: {})",
            last_action, analysis.files_modified, analysis.confidence_score, analysis.work_summary
        );

        if !can_continue {
            return Ok(IterationEnd::Halted(self.breaker.state().reason.clone()));
        }

        Ok(match outcome {
            InvocationOutcome::Success(_) => IterationEnd::Continue,
            InvocationOutcome::Timeout | InvocationOutcome::Failed(_) => IterationEnd::Backoff,
            InvocationOutcome::RateLimited(_) => IterationEnd::ExternalLimit,
        })
    }

    /// Cleanup on interruption: reset the session and write a final
    /// snapshot. Tolerates components in partially-updated state - every
    /// failure is logged and swallowed so the handler always completes.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.session.reset("interrupted", self.loop_count) {
            warn!("Shutdown: failed to reset session: {e}");
        }
        if let Err(e) = self.write_status("interrupted", "shutdown", None) {
            warn!("Shutdown: failed to write final status: {e}");
        }
        info!("Shutdown complete after {} loops", self.loop_count);
    }

    fn write_status(&self, status: &str, last_action: &str, exit_reason: Option<&str>) -> Result<()> {
        self.status.write(&StatusSnapshot {
            timestamp: chrono::Utc::now(),
            loop_count: self.loop_count,
            calls_made_this_hour: self.rate_limiter.calls_made(),
            max_calls_per_hour: self.rate_limiter.max_calls(),
            last_action: last_action.to_string(),
            status: status.to_string(),
            exit_reason: exit_reason.map(str::to_string),
            next_reset: self.rate_limiter.next_reset(),
        })
    }
}

/// How one iteration ended, from the loop's point of view.
enum IterationEnd {
    /// Success: brief pause, then continue.
    Continue,
    /// Timeout or failure: fixed backoff, then continue.
    Backoff,
    /// The agent hit its own usage limit: escalate to the operator.
    ExternalLimit,
    /// The breaker opened: halt.
    Halted(String),
}
