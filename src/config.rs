//! Resolved loop configuration.
//!
//! The CLI layer resolves all flags and environment into one [`LoopConfig`]
//! which is constructed once and passed by reference into every component.
//! No component reads ambient globals.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VigilError};

/// Minimum per-iteration timeout in minutes.
pub const MIN_TIMEOUT_MINUTES: u64 = 1;

/// Maximum per-iteration timeout in minutes.
pub const MAX_TIMEOUT_MINUTES: u64 = 120;

/// Default per-iteration timeout in minutes.
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 15;

/// Default session expiry in hours.
pub const DEFAULT_SESSION_EXPIRY_HOURS: i64 = 24;

/// Name of the state directory created inside the project.
pub const STATE_DIR_NAME: &str = ".vigil";

/// Output format the agent is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// JSON documents; parsed by the structured analyzer path.
    Structured,
    /// Plain text; parsed by the freeform heuristic path.
    Freeform,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Structured => write!(f, "structured"),
            OutputFormat::Freeform => write!(f, "freeform"),
        }
    }
}

/// Resolved configuration for a supervisor run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Project directory the agent operates on.
    pub project_dir: PathBuf,
    /// Path to the prompt/input source fed to the agent each iteration.
    pub prompt_path: PathBuf,
    /// Maximum agent invocations per hour window.
    pub max_calls_per_hour: u32,
    /// Per-iteration wall-clock deadline in minutes (clamped to 1-120).
    pub timeout_minutes: u64,
    /// Output format the agent is asked to produce.
    pub output_format: OutputFormat,
    /// Whether to resume the agent with the stored continuation token.
    pub session_continuity: bool,
    /// Hours after which a continuation token is no longer resumable.
    pub session_expiry_hours: i64,
    /// Whitelist of external actions the agent is permitted to take.
    pub allowed_tools: Vec<String>,
    /// Pause after a successful iteration, in seconds.
    pub pause_secs: u64,
    /// Backoff after a failed or timed-out iteration, in seconds.
    pub backoff_secs: u64,
    /// Declared output-decline ratio threshold. Present in the configuration
    /// surface but not currently consulted by the circuit breaker.
    pub output_decline_threshold: f64,
}

impl LoopConfig {
    /// Creates a configuration with defaults for the given project directory.
    #[must_use]
    pub fn new<P: AsRef<Path>>(project_dir: P) -> Self {
        let project_dir = project_dir.as_ref().to_path_buf();
        Self {
            prompt_path: project_dir.join("PROMPT.md"),
            project_dir,
            max_calls_per_hour: 100,
            timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            output_format: OutputFormat::Structured,
            session_continuity: true,
            session_expiry_hours: DEFAULT_SESSION_EXPIRY_HOURS,
            allowed_tools: Vec::new(),
            pause_secs: 2,
            backoff_secs: 30,
            output_decline_threshold: 0.5,
        }
    }

    /// Set the prompt path.
    #[must_use]
    pub fn with_prompt_path(mut self, path: PathBuf) -> Self {
        self.prompt_path = path;
        self
    }

    /// Set the hourly call budget.
    #[must_use]
    pub fn with_max_calls_per_hour(mut self, max: u32) -> Self {
        self.max_calls_per_hour = max;
        self
    }

    /// Set the per-iteration timeout, clamped to the supported range.
    #[must_use]
    pub fn with_timeout_minutes(mut self, minutes: u64) -> Self {
        self.timeout_minutes = minutes.clamp(MIN_TIMEOUT_MINUTES, MAX_TIMEOUT_MINUTES);
        self
    }

    /// Set the output format.
    #[must_use]
    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Enable or disable session continuity.
    #[must_use]
    pub fn with_session_continuity(mut self, enabled: bool) -> Self {
        self.session_continuity = enabled;
        self
    }

    /// Set the session expiry in hours.
    #[must_use]
    pub fn with_session_expiry_hours(mut self, hours: i64) -> Self {
        self.session_expiry_hours = hours;
        self
    }

    /// Path to the state directory for this project.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.project_dir.join(STATE_DIR_NAME)
    }

    /// The per-iteration deadline as a [`Duration`].
    #[must_use]
    pub fn iteration_deadline(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::InvalidConfig`] for out-of-range values and
    /// [`VigilError::MissingFile`] when the prompt source does not exist.
    /// A missing prompt is fatal at startup; there is no default fallback.
    pub fn validate(&self) -> Result<()> {
        if self.max_calls_per_hour == 0 {
            return Err(VigilError::InvalidConfig {
                field: "max_calls_per_hour".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if !(MIN_TIMEOUT_MINUTES..=MAX_TIMEOUT_MINUTES).contains(&self.timeout_minutes) {
            return Err(VigilError::InvalidConfig {
                field: "timeout_minutes".to_string(),
                reason: format!(
                    "must be between {} and {}",
                    MIN_TIMEOUT_MINUTES, MAX_TIMEOUT_MINUTES
                ),
            });
        }
        if self.session_expiry_hours <= 0 {
            return Err(VigilError::InvalidConfig {
                field: "session_expiry_hours".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.output_decline_threshold) {
            return Err(VigilError::InvalidConfig {
                field: "output_decline_threshold".to_string(),
                reason: "must be a ratio between 0.0 and 1.0".to_string(),
            });
        }
        if !self.prompt_path.exists() {
            return Err(VigilError::MissingFile {
                path: self.prompt_path.clone(),
            });
        }
        Ok(())
    }
}
