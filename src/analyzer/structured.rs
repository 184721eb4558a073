//! Structured (JSON) output path.
//!
//! Agents emit heterogeneous JSON: field names drifted across versions, so
//! every field is extracted through a documented fallback precedence
//! (primary name, then legacy alias, then default). The fallback logic is
//! contained entirely in [`StructuredFields::from_value`]; downstream
//! consumers only ever see the canonical shape.

use chrono::Utc;
use serde_json::Value;

use crate::analyzer::{OutputKind, ResponseAnalysis, STUCK_ERROR_THRESHOLD};

/// Canonical fields extracted from structured agent output.
#[derive(Debug, Clone, Default)]
pub struct StructuredFields {
    /// Result/summary text.
    pub result_text: Option<String>,
    /// Whether the primary `result` field (not an alias) was present.
    pub had_primary_result: bool,
    /// Continuation token.
    pub session_id: Option<String>,
    /// Files changed during the iteration.
    pub files_changed: u32,
    /// Declared error flag.
    pub is_error: bool,
    /// Declared completion status.
    pub status: Option<String>,
    /// Explicit exit flag.
    pub exit_flag: Option<bool>,
    /// Declared error message.
    pub error_message: Option<String>,
    /// Files the agent created.
    pub created_files: Vec<String>,
    /// Files the agent reported missing.
    pub missing_files: Vec<String>,
    /// Declared work type (e.g. `TEST_ONLY`).
    pub work_type: Option<String>,
    /// Declared numeric confidence.
    pub confidence: u32,
    /// Number of declared progress indicators.
    pub progress_indicators: u32,
    /// Declared or derived error count.
    pub error_count: u32,
}

fn str_field(obj: &Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| obj.get(n).and_then(Value::as_str))
        .map(str::to_string)
}

fn bool_field(obj: &Value, names: &[&str]) -> Option<bool> {
    names.iter().find_map(|n| obj.get(n).and_then(Value::as_bool))
}

fn u32_field(obj: &Value, names: &[&str]) -> Option<u32> {
    names
        .iter()
        .find_map(|n| obj.get(n).and_then(Value::as_u64))
        .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
}

fn list_field(obj: &Value, names: &[&str]) -> Vec<String> {
    names
        .iter()
        .find_map(|n| obj.get(n).and_then(Value::as_array))
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl StructuredFields {
    /// Normalizes a raw JSON value through the fallback chains.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        // Stream-style output arrives as an array of message objects; the
        // final object carries the iteration result.
        let obj = match value {
            Value::Array(items) => items
                .iter()
                .rev()
                .find(|v| v.is_object())
                .cloned()
                .unwrap_or(Value::Null),
            other => other.clone(),
        };

        let had_primary_result = obj.get("result").and_then(Value::as_str).is_some();
        let error_message = str_field(&obj, &["error_message", "error"]);
        let is_error = bool_field(&obj, &["is_error", "error"]).unwrap_or(false)
            || error_message.is_some();

        let errors_list_len = obj
            .get("errors")
            .and_then(Value::as_array)
            .map(|a| a.len() as u32);
        let error_count = u32_field(&obj, &["error_count", "num_errors"])
            .or(errors_list_len)
            .unwrap_or(u32::from(is_error));

        Self {
            result_text: str_field(&obj, &["result", "summary", "text"]),
            had_primary_result,
            session_id: str_field(&obj, &["session_id", "sessionId"]),
            files_changed: u32_field(&obj, &["files_changed", "num_files_changed"]).unwrap_or(0),
            is_error,
            status: str_field(&obj, &["status", "completion_status"]),
            exit_flag: bool_field(&obj, &["exit_signal", "should_exit"]),
            error_message,
            created_files: list_field(&obj, &["created_files", "files_created"]),
            missing_files: list_field(&obj, &["missing_files"]),
            work_type: str_field(&obj, &["work_type", "workType"]),
            // Declared confidence is a 0-100 score; out-of-range input is
            // clamped here so scoring never overflows.
            confidence: u32_field(&obj, &["confidence"]).unwrap_or(0).min(100),
            progress_indicators: obj
                .get("progress_indicators")
                .and_then(Value::as_array)
                .map(|a| a.len() as u32)
                .unwrap_or(0),
            error_count,
        }
    }
}

/// Attempts the structured path: the output must lead with a structural
/// delimiter and parse as well-formed JSON.
#[must_use]
pub fn try_parse(output: &str) -> Option<StructuredFields> {
    let trimmed = output.trim_start();
    if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    Some(StructuredFields::from_value(&value))
}

/// Scores canonical structured fields into a [`ResponseAnalysis`].
#[must_use]
pub fn analyze(loop_index: u32, output: &str, fields: &StructuredFields) -> ResponseAnalysis {
    let status_complete = fields
        .status
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case("complete"));
    let exit_signal = status_complete || fields.exit_flag == Some(true);

    let confidence_score = if exit_signal {
        100
    } else {
        let mut score = fields.confidence.saturating_add(50);
        if fields.had_primary_result {
            score = score.saturating_add(20);
        }
        score.saturating_add(fields.progress_indicators.saturating_mul(5))
    };

    let work_summary = fields
        .result_text
        .as_deref()
        .and_then(|t| t.lines().next())
        .map(str::to_string)
        .unwrap_or_else(|| "structured response without summary".to_string());

    ResponseAnalysis {
        loop_index,
        timestamp: Utc::now(),
        output_format: OutputKind::Structured,
        has_completion_signal: exit_signal,
        is_test_only: fields.work_type.as_deref() == Some("TEST_ONLY"),
        is_stuck: fields.error_count as usize >= STUCK_ERROR_THRESHOLD,
        has_progress: fields.files_changed > 0,
        files_modified: fields.files_changed,
        confidence_score,
        exit_signal,
        explicit_exit: exit_signal,
        work_summary,
        output_length: output.len(),
        session_token: fields.session_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze_str(loop_index: u32, output: &str) -> ResponseAnalysis {
        let fields = try_parse(output).expect("should parse as structured");
        analyze(loop_index, output, &fields)
    }

    #[test]
    fn explicit_exit_flag_forces_full_confidence() {
        let analysis = analyze_str(1, r#"{"exit_signal": true, "result": "all done"}"#);
        assert!(analysis.exit_signal);
        assert!(analysis.explicit_exit);
        assert_eq!(analysis.confidence_score, 100);
    }

    #[test]
    fn status_complete_is_case_insensitive() {
        let analysis = analyze_str(1, r#"{"status": "COMPLETE"}"#);
        assert!(analysis.exit_signal);
        assert_eq!(analysis.confidence_score, 100);

        let analysis = analyze_str(1, r#"{"status": "in_progress"}"#);
        assert!(!analysis.exit_signal);
    }

    #[test]
    fn confidence_accumulates_without_exit() {
        // base 10 declared + 50 + 20 primary result + 2 indicators * 5
        let analysis = analyze_str(
            1,
            r#"{"confidence": 10, "result": "worked", "progress_indicators": ["a", "b"]}"#,
        );
        assert_eq!(analysis.confidence_score, 90);
        assert!(!analysis.exit_signal);
    }

    #[test]
    fn absurd_declared_confidence_is_clamped() {
        // u32::MAX declared confidence must neither panic nor dominate.
        let analysis = analyze_str(1, r#"{"confidence": 4294967295}"#);
        assert_eq!(analysis.confidence_score, 150);

        // Values beyond u32 saturate at the parse boundary, then clamp.
        let fields = try_parse(r#"{"confidence": 4294967296}"#).unwrap();
        assert_eq!(fields.confidence, 100);
    }

    #[test]
    fn oversized_numeric_fields_saturate() {
        let fields = try_parse(r#"{"files_changed": 99999999999}"#).unwrap();
        assert_eq!(fields.files_changed, u32::MAX);
    }

    #[test]
    fn legacy_alias_does_not_earn_primary_bonus() {
        let analysis = analyze_str(1, r#"{"summary": "worked"}"#);
        // 0 declared + 50, no primary-result bonus for the alias
        assert_eq!(analysis.confidence_score, 50);
        assert_eq!(analysis.work_summary, "worked");
    }

    #[test]
    fn field_fallback_chains() {
        let fields = try_parse(
            r#"{"sessionId": "abc-123", "num_files_changed": 4, "files_created": ["a.rs"]}"#,
        )
        .unwrap();
        assert_eq!(fields.session_id.as_deref(), Some("abc-123"));
        assert_eq!(fields.files_changed, 4);
        assert_eq!(fields.created_files, vec!["a.rs".to_string()]);
    }

    #[test]
    fn test_only_work_type() {
        let analysis = analyze_str(1, r#"{"work_type": "TEST_ONLY"}"#);
        assert!(analysis.is_test_only);

        let analysis = analyze_str(1, r#"{"work_type": "IMPLEMENTATION"}"#);
        assert!(!analysis.is_test_only);
    }

    #[test]
    fn stuck_from_declared_error_count() {
        let analysis = analyze_str(1, r#"{"error_count": 6}"#);
        assert!(analysis.is_stuck);

        let analysis = analyze_str(1, r#"{"error_count": 2}"#);
        assert!(!analysis.is_stuck);
    }

    #[test]
    fn array_output_uses_last_object() {
        let analysis = analyze_str(
            1,
            r#"[{"text": "thinking"}, {"result": "final answer", "files_changed": 1}]"#,
        );
        assert_eq!(analysis.work_summary, "final answer");
        assert!(analysis.has_progress);
    }

    #[test]
    fn non_json_is_rejected() {
        assert!(try_parse("plain text output").is_none());
        assert!(try_parse("{ broken json").is_none());
    }

    #[test]
    fn error_string_field_sets_error_flag() {
        let fields = try_parse(r#"{"error": "compilation failed"}"#).unwrap();
        assert!(fields.is_error);
        assert_eq!(fields.error_message.as_deref(), Some("compilation failed"));
        assert_eq!(fields.error_count, 1);
    }
}
