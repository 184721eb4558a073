//! Rolling exit-signal aggregation.
//!
//! Individual loop analyses are noisy; the aggregator tracks them across a
//! bounded window and only recommends a graceful exit when a pattern holds:
//! several test-only loops in a row, repeated completion signals, sustained
//! high confidence confirmed by an explicit flag, or a fully checked plan.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::analyzer::ResponseAnalysis;
use crate::error::Result;
use crate::storage;
use crate::testing::TaskListSource;

/// Filename for the persisted signal windows.
pub const SIGNALS_FILENAME: &str = "exit_signals.json";

/// Maximum entries kept per rolling window.
pub const WINDOW_CAP: usize = 5;

/// Test-only loops required to trigger `test_saturation`.
pub const TEST_SATURATION_THRESHOLD: usize = 3;

/// Completion signals required to trigger `completion_signals`.
pub const COMPLETION_SIGNALS_THRESHOLD: usize = 2;

/// High-confidence loops required (with an explicit flag) for `project_complete`.
pub const COMPLETION_INDICATORS_THRESHOLD: usize = 2;

/// Confidence at or above which a loop counts as a completion indicator.
pub const COMPLETION_INDICATOR_CONFIDENCE: u32 = 60;

/// Why the aggregator recommends exiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Several recent loops only ran tests.
    TestSaturation,
    /// Repeated completion signals across recent loops.
    CompletionSignals,
    /// Sustained high confidence confirmed by an explicit exit flag.
    ProjectComplete,
    /// The tracked plan's checklist is fully complete.
    PlanComplete,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::TestSaturation => write!(f, "test_saturation"),
            ExitReason::CompletionSignals => write!(f, "completion_signals"),
            ExitReason::ProjectComplete => write!(f, "project_complete"),
            ExitReason::PlanComplete => write!(f, "plan_complete"),
        }
    }
}

/// Persisted rolling windows of loop indices.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExitSignalWindow {
    /// Loops whose output was test-only.
    pub test_only_loops: Vec<u32>,
    /// Loops that carried a completion signal.
    pub done_signals: Vec<u32>,
    /// Loops whose confidence reached the indicator threshold.
    pub completion_indicators: Vec<u32>,
    /// Whether the most recent analysis carried an explicit exit flag.
    #[serde(default)]
    pub last_explicit_exit: bool,
}

fn push_capped(window: &mut Vec<u32>, loop_index: u32) {
    window.push(loop_index);
    if window.len() > WINDOW_CAP {
        let excess = window.len() - WINDOW_CAP;
        window.drain(..excess);
    }
}

/// Aggregates analyzer signals across loops and decides graceful exit.
#[derive(Debug)]
pub struct ExitSignalAggregator {
    window: ExitSignalWindow,
    path: PathBuf,
}

impl ExitSignalAggregator {
    /// Loads the aggregator, starting empty when no valid state exists.
    ///
    /// # Errors
    ///
    /// Returns an error only for unexpected I/O failures.
    pub fn load<P: AsRef<Path>>(state_dir: P) -> Result<Self> {
        let path = state_dir.as_ref().join(SIGNALS_FILENAME);
        let window = storage::load_json(&path)?.unwrap_or_default();
        Ok(Self { window, path })
    }

    /// Current window state (read-only).
    #[must_use]
    pub fn window(&self) -> &ExitSignalWindow {
        &self.window
    }

    /// Feeds one analysis into the rolling windows and persists them.
    ///
    /// # Errors
    ///
    /// Returns an error if the windows cannot be persisted.
    pub fn record(&mut self, analysis: &ResponseAnalysis) -> Result<()> {
        if analysis.is_test_only {
            push_capped(&mut self.window.test_only_loops, analysis.loop_index);
        } else if analysis.has_progress {
            // Real work clears the test-only streak.
            self.window.test_only_loops.clear();
        }

        if analysis.has_completion_signal {
            push_capped(&mut self.window.done_signals, analysis.loop_index);
        }

        if analysis.confidence_score >= COMPLETION_INDICATOR_CONFIDENCE {
            push_capped(&mut self.window.completion_indicators, analysis.loop_index);
        }

        self.window.last_explicit_exit = analysis.explicit_exit && analysis.exit_signal;

        debug!(
            "Signals after loop {}: test_only={} done={} indicators={}",
            analysis.loop_index,
            self.window.test_only_loops.len(),
            self.window.done_signals.len(),
            self.window.completion_indicators.len()
        );

        storage::save_json(&self.path, &self.window)
    }

    /// Evaluates the exit rules in order and returns the first match.
    ///
    /// # Errors
    ///
    /// Returns an error if the task-list collaborator fails.
    pub fn evaluate_exit(&self, tasks: &dyn TaskListSource) -> Result<Option<ExitReason>> {
        if self.window.test_only_loops.len() >= TEST_SATURATION_THRESHOLD {
            info!(
                "Exit: {} recent loops were test-only",
                self.window.test_only_loops.len()
            );
            return Ok(Some(ExitReason::TestSaturation));
        }

        if self.window.done_signals.len() >= COMPLETION_SIGNALS_THRESHOLD {
            info!(
                "Exit: {} completion signals in window",
                self.window.done_signals.len()
            );
            return Ok(Some(ExitReason::CompletionSignals));
        }

        // High confidence alone is not enough; an explicit flag must confirm.
        if self.window.completion_indicators.len() >= COMPLETION_INDICATORS_THRESHOLD
            && self.window.last_explicit_exit
        {
            info!("Exit: sustained high confidence with explicit exit flag");
            return Ok(Some(ExitReason::ProjectComplete));
        }

        if let Some(counts) = tasks.checklist()? {
            if counts.all_complete() {
                info!(
                    "Exit: plan checklist complete ({}/{})",
                    counts.checked, counts.total
                );
                return Ok(Some(ExitReason::PlanComplete));
            }
        }

        Ok(None)
    }
}
