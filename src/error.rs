//! Custom error types for Vigil.
//!
//! This module provides structured error types that enable better
//! error handling, reporting, and recovery throughout the supervisor loop.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Vigil operations
#[derive(Error, Debug)]
pub enum VigilError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load or resolve configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Missing required file (e.g. the prompt source)
    #[error("Missing required file: {path}")]
    MissingFile { path: PathBuf },

    // =========================================================================
    // Loop Execution Errors
    // =========================================================================
    /// Loop execution failed
    #[error("Loop execution error: {message}")]
    Loop { message: String },

    /// Circuit breaker opened - stagnation detected
    #[error("Stagnation detected at loop {loop_index}: {reason}")]
    StagnationDetected { loop_index: u32, reason: String },

    /// Agent invocation exceeded its deadline
    #[error("Agent invocation timed out after {minutes} minutes (loop {loop_index})")]
    AgentTimeout { loop_index: u32, minutes: u64 },

    /// Agent process failed
    #[error("Agent process failed with exit code {exit_code}: {message}")]
    AgentProcess { exit_code: i32, message: String },

    /// Operator chose to abort after an external rate-limit escalation
    #[error("Aborted by operator: {reason}")]
    OperatorAbort { reason: String },

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// Session state could not be persisted
    #[error("Session error: {message}")]
    Session { message: String },

    // =========================================================================
    // Tool Errors
    // =========================================================================
    /// Missing required external tool
    #[error("Missing required tool: {tool}")]
    MissingTool { tool: String },

    /// Another loop process holds the state directory lock
    #[error("State directory is locked by another process: {path}")]
    StateLocked { path: PathBuf },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VigilError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create a loop error
    pub fn loop_error(message: impl Into<String>) -> Self {
        Self::Loop {
            message: message.into(),
        }
    }

    /// Create a session error
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error is recoverable (the loop may continue after backoff)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Loop { .. } | Self::AgentTimeout { .. } | Self::AgentProcess { .. }
        )
    }

    /// Check if this error is fatal (the loop must halt)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StagnationDetected { .. }
                | Self::OperatorAbort { .. }
                | Self::MissingFile { .. }
                | Self::MissingTool { .. }
                | Self::StateLocked { .. }
                | Self::Config { .. }
                | Self::InvalidConfig { .. }
        )
    }

    /// Check if this error requires an operator decision
    pub fn requires_operator(&self) -> bool {
        matches!(self, Self::OperatorAbort { .. })
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::StagnationDetected { .. } => 3,
            Self::OperatorAbort { .. } => 4,
            Self::StateLocked { .. } => 5,
            Self::MissingFile { .. } | Self::MissingTool { .. } => 6,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            _ => 1,
        }
    }
}

/// Type alias for Vigil results
pub type Result<T> = std::result::Result<T, VigilError>;
