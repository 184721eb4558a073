//! Agent output classification.
//!
//! Each iteration's raw output is classified into one [`ResponseAnalysis`]
//! record: did the agent make progress, does it look stuck, did it only run
//! tests, and how confident are we that the work is finished.
//!
//! Two parsing paths exist. If the output leads with a structural delimiter
//! and parses as JSON, the [`structured`] adapter normalizes its
//! heterogeneous field aliases into canonical fields. Anything else goes
//! through the [`freeform`] heuristics. A structured parse failure is never
//! a hard failure of the iteration; it just means the freeform path runs.

pub mod freeform;
pub mod structured;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::storage;
use crate::testing::ChangeCounter;

/// Confidence at or above which the heuristic path signals exit.
pub const EXIT_CONFIDENCE_THRESHOLD: u32 = 40;

/// Error-pattern matches at or above which the output is judged stuck.
pub const STUCK_ERROR_THRESHOLD: usize = 5;

/// Filename for the analyzer's carry-over state (previous output length).
pub const ANALYZER_STATE_FILENAME: &str = "analyzer_state.json";

/// Which parsing path produced an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Parsed from well-formed structured data.
    Structured,
    /// Classified by freeform heuristics.
    Freeform,
}

/// Normalized classification of one agent invocation's output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseAnalysis {
    /// Loop index this analysis belongs to.
    pub loop_index: u32,
    /// When the analysis ran.
    pub timestamp: DateTime<Utc>,
    /// Which parsing path produced it.
    pub output_format: OutputKind,
    /// The output carried a completion indicator.
    pub has_completion_signal: bool,
    /// Only test activity was detected, no implementation work.
    pub is_test_only: bool,
    /// Repeated errors suggest the agent is stuck.
    pub is_stuck: bool,
    /// Files changed this iteration.
    pub has_progress: bool,
    /// Changed-file count backing `has_progress`.
    pub files_modified: u32,
    /// Accumulated heuristic confidence (0-100+).
    pub confidence_score: u32,
    /// Final exit decision for this iteration.
    pub exit_signal: bool,
    /// `exit_signal` came from an explicit flag, not heuristic confidence.
    #[serde(default)]
    pub explicit_exit: bool,
    /// Short human-readable summary of what the loop did.
    pub work_summary: String,
    /// Raw output length in bytes.
    pub output_length: usize,
    /// Continuation token the agent reported, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

/// Persisted per-loop analysis document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Loop index.
    pub loop_number: u32,
    /// When the analysis ran.
    pub timestamp: DateTime<Utc>,
    /// Where the raw output was stored.
    pub output_file: PathBuf,
    /// Which parsing path produced the analysis.
    pub output_format: OutputKind,
    /// The normalized analysis itself.
    pub analysis: ResponseAnalysis,
}

/// Carry-over state between loops.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AnalyzerState {
    /// Output length of the previous loop, for trend comparison.
    last_output_length: Option<usize>,
}

/// Classifies agent output, one invocation at a time.
#[derive(Debug)]
pub struct ResponseAnalyzer {
    state_dir: PathBuf,
    state: AnalyzerState,
    patterns: freeform::HeuristicPatterns,
}

impl ResponseAnalyzer {
    /// Loads the analyzer, restoring the previous loop's output length.
    ///
    /// # Errors
    ///
    /// Returns an error only for unexpected I/O failures.
    pub fn load<P: AsRef<Path>>(state_dir: P) -> Result<Self> {
        let state_dir = state_dir.as_ref().to_path_buf();
        let state = storage::load_json(&state_dir.join(ANALYZER_STATE_FILENAME))?
            .unwrap_or_default();
        Ok(Self {
            state_dir,
            state,
            patterns: freeform::HeuristicPatterns::new(),
        })
    }

    /// Classifies one invocation's output and persists the analysis record.
    ///
    /// The changed-file count comes from the version-control collaborator,
    /// not from the output itself, on the freeform path.
    ///
    /// # Errors
    ///
    /// Returns an error if state or the record cannot be persisted.
    pub fn analyze(
        &mut self,
        loop_index: u32,
        output: &str,
        changes: &dyn ChangeCounter,
    ) -> Result<ResponseAnalysis> {
        let previous_length = self.state.last_output_length;

        let analysis = match structured::try_parse(output) {
            Some(fields) => {
                debug!("Loop {loop_index}: structured output path");
                structured::analyze(loop_index, output, &fields)
            }
            None => {
                debug!("Loop {loop_index}: freeform output path");
                self.patterns
                    .analyze(loop_index, output, previous_length, changes)?
            }
        };

        self.state.last_output_length = Some(output.len());
        storage::save_json(
            &self.state_dir.join(ANALYZER_STATE_FILENAME),
            &self.state,
        )?;
        self.persist_record(&analysis, output)?;

        Ok(analysis)
    }

    fn persist_record(&self, analysis: &ResponseAnalysis, output: &str) -> Result<()> {
        let outputs_dir = self.state_dir.join("outputs");
        std::fs::create_dir_all(&outputs_dir)?;
        let output_file = outputs_dir.join(format!("loop_{:04}.txt", analysis.loop_index));
        std::fs::write(&output_file, output)?;

        let analyses_dir = self.state_dir.join("analyses");
        let record = AnalysisRecord {
            loop_number: analysis.loop_index,
            timestamp: analysis.timestamp,
            output_file,
            output_format: analysis.output_format,
            analysis: analysis.clone(),
        };
        storage::save_json(
            &analyses_dir.join(format!("loop_{:04}.json", analysis.loop_index)),
            &record,
        )
    }

    /// Output length recorded for the previous loop.
    #[must_use]
    pub fn last_output_length(&self) -> Option<usize> {
        self.state.last_output_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChangeCounter;
    use tempfile::TempDir;

    #[test]
    fn dispatches_structured_for_json() {
        let temp = TempDir::new().unwrap();
        let mut analyzer = ResponseAnalyzer::load(temp.path()).unwrap();
        let changes = MockChangeCounter::new();

        let analysis = analyzer
            .analyze(1, r#"{"result": "did things", "files_changed": 2}"#, &changes)
            .unwrap();
        assert_eq!(analysis.output_format, OutputKind::Structured);
        assert_eq!(analysis.files_modified, 2);
    }

    #[test]
    fn dispatches_freeform_for_plain_text() {
        let temp = TempDir::new().unwrap();
        let mut analyzer = ResponseAnalyzer::load(temp.path()).unwrap();
        let changes = MockChangeCounter::new();

        let analysis = analyzer
            .analyze(1, "I refactored the parser module.", &changes)
            .unwrap();
        assert_eq!(analysis.output_format, OutputKind::Freeform);
    }

    #[test]
    fn malformed_json_falls_back_to_freeform() {
        let temp = TempDir::new().unwrap();
        let mut analyzer = ResponseAnalyzer::load(temp.path()).unwrap();
        let changes = MockChangeCounter::new();

        let analysis = analyzer
            .analyze(1, "{ this is not actually json", &changes)
            .unwrap();
        assert_eq!(analysis.output_format, OutputKind::Freeform);
    }

    #[test]
    fn previous_output_length_carries_across_loads() {
        let temp = TempDir::new().unwrap();
        let changes = MockChangeCounter::new();
        {
            let mut analyzer = ResponseAnalyzer::load(temp.path()).unwrap();
            analyzer
                .analyze(1, "a fairly long output from the first loop", &changes)
                .unwrap();
        }

        let analyzer = ResponseAnalyzer::load(temp.path()).unwrap();
        assert_eq!(
            analyzer.last_output_length(),
            Some("a fairly long output from the first loop".len())
        );
    }

    #[test]
    fn record_written_per_loop() {
        let temp = TempDir::new().unwrap();
        let mut analyzer = ResponseAnalyzer::load(temp.path()).unwrap();
        let changes = MockChangeCounter::new();

        analyzer.analyze(3, "some output", &changes).unwrap();

        let record_path = temp.path().join("analyses").join("loop_0003.json");
        assert!(record_path.exists());
        let record: AnalysisRecord =
            serde_json::from_str(&std::fs::read_to_string(&record_path).unwrap()).unwrap();
        assert_eq!(record.loop_number, 3);
        assert!(record.output_file.exists());
        assert_eq!(
            std::fs::read_to_string(&record.output_file).unwrap(),
            "some output"
        );
    }
}
