//! Freeform (plain text) output heuristics.
//!
//! Used whenever structured parsing fails. A fixed vocabulary of patterns
//! turns noisy agent prose into the same normalized signals the structured
//! path produces. An explicit `EXIT_SIGNAL: true|false` status line, when
//! present, overrides every heuristic below it.

use chrono::Utc;
use regex::Regex;
use tracing::debug;

use crate::analyzer::{
    OutputKind, ResponseAnalysis, EXIT_CONFIDENCE_THRESHOLD, STUCK_ERROR_THRESHOLD,
};
use crate::error::Result;
use crate::testing::ChangeCounter;

/// Compiled heuristic pattern tables.
///
/// Compiled once at analyzer construction; the patterns are fixed and all
/// known-good, so construction cannot fail.
#[derive(Debug)]
pub struct HeuristicPatterns {
    explicit_exit: Regex,
    completion: Regex,
    no_work_remaining: Regex,
    test_commands: Regex,
    implementation: Regex,
    error_key_line: Regex,
    error_indicators: Vec<Regex>,
}

impl HeuristicPatterns {
    /// Compiles the fixed pattern tables.
    #[must_use]
    pub fn new() -> Self {
        let compile = |p: &str| Regex::new(p).expect("fixed pattern compiles");
        Self {
            explicit_exit: compile(r"(?mi)^\s*EXIT_SIGNAL\s*[:=]\s*(true|false)\s*$"),
            completion: compile(
                r"(?i)\b(done|complete|completed|finished|ready for review)\b",
            ),
            no_work_remaining: compile(
                r"(?i)(no work remaining|nothing left to do|no remaining (work|tasks)|all tasks (are )?complete)",
            ),
            test_commands: compile(
                r"(?i)(cargo test|npm test|pytest|go test|running \d+ tests?|test result:|tests? pass(ed)?|tests? fail(ed)?)",
            ),
            implementation: compile(
                r"(?i)(implement(ed|ing|ation)?|creat(ed|ing) (a )?(file|module|struct|function)|refactor(ed|ing)?|add(ed|ing) (a )?(function|method|field|type)|modif(ied|ying)|wrote|fix(ed|ing))",
            ),
            error_key_line: compile(r#"(?i)"[^"\n]*error[^"\n]*"\s*:"#),
            error_indicators: vec![
                compile(r"(?m)^\s*(Error|ERROR|error):"),
                compile(r"\]: error"),
                compile(r"Error occurred"),
                compile(r"failed with error"),
                compile(r"(?i)\bexception\b"),
                compile(r"\b(Fatal|FATAL)\b"),
            ],
        }
    }

    /// Parses an explicit `EXIT_SIGNAL` status line, if present.
    #[must_use]
    pub fn explicit_exit_flag(&self, output: &str) -> Option<bool> {
        self.explicit_exit
            .captures(output)
            .map(|c| c[1].eq_ignore_ascii_case("true"))
    }

    /// Two-stage error counting: lines that look like structured-data keys
    /// containing "error" are stripped first, so field names echoed into the
    /// transcript never count as real errors.
    #[must_use]
    pub fn count_errors(&self, output: &str) -> usize {
        let filtered: String = output
            .lines()
            .filter(|line| !self.error_key_line.is_match(line))
            .collect::<Vec<_>>()
            .join("\n");

        self.error_indicators
            .iter()
            .map(|re| re.find_iter(&filtered).count())
            .sum()
    }

    /// Derives a short work summary: the first sentence carrying a
    /// completion-like phrase, else a generic fallback.
    #[must_use]
    pub fn work_summary(&self, output: &str) -> String {
        output
            .split(['.', '\n'])
            .map(str::trim)
            .find(|s| !s.is_empty() && self.completion.is_match(s))
            .map(|s| s.chars().take(120).collect())
            .unwrap_or_else(|| "agent produced freeform output".to_string())
    }

    /// Runs the full heuristic pipeline over one loop's output.
    ///
    /// # Errors
    ///
    /// Returns an error if the change counter collaborator fails.
    pub fn analyze(
        &self,
        loop_index: u32,
        output: &str,
        previous_length: Option<usize>,
        changes: &dyn ChangeCounter,
    ) -> Result<ResponseAnalysis> {
        let explicit = self.explicit_exit_flag(output);
        let mut confidence: u32 = 0;
        let mut has_completion_signal = false;

        if self.completion.is_match(output) {
            has_completion_signal = true;
            confidence += 10;
        }

        let test_matches = self.test_commands.find_iter(output).count();
        let impl_matches = self.implementation.find_iter(output).count();
        let is_test_only = test_matches > 0 && impl_matches == 0;

        let error_count = self.count_errors(output);
        let is_stuck = error_count >= STUCK_ERROR_THRESHOLD;

        if self.no_work_remaining.is_match(output) {
            has_completion_signal = true;
            confidence += 15;
        }

        let files_modified = changes.changed_files()?;
        let has_progress = files_modified > 0;
        if has_progress {
            confidence += 20;
        }

        if let Some(prev) = previous_length {
            if prev > 0 && (output.len() as f64) / (prev as f64) < 0.5 {
                confidence += 10;
            }
        }

        let (exit_signal, explicit_exit, confidence) = match explicit {
            Some(true) => (true, true, 100),
            Some(false) => (false, true, confidence),
            None => (
                confidence >= EXIT_CONFIDENCE_THRESHOLD || has_completion_signal,
                false,
                confidence,
            ),
        };

        debug!(
            "Loop {loop_index} freeform: confidence={confidence} errors={error_count} \
             tests={test_matches} impl={impl_matches} exit={exit_signal}"
        );

        Ok(ResponseAnalysis {
            loop_index,
            timestamp: Utc::now(),
            output_format: OutputKind::Freeform,
            has_completion_signal,
            is_test_only,
            is_stuck,
            has_progress,
            files_modified,
            confidence_score: confidence,
            exit_signal,
            explicit_exit,
            work_summary: self.work_summary(output),
            output_length: output.len(),
            session_token: None,
        })
    }
}

impl Default for HeuristicPatterns {
    fn default() -> Self {
        Self::new()
    }
}
