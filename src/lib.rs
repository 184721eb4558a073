//! Vigil - unattended agent supervisor loop
//!
//! Repeatedly invokes an external autonomous coding agent against a project,
//! classifies its noisy output, and decides after every iteration whether to
//! continue, throttle, halt, or stop. All decision state is file-backed under
//! `.vigil/` so an interrupted loop resumes where it left off.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`analyzer`] - Structured and freeform output classification
//! - [`breaker`] - Circuit breaker halting the loop on stagnation
//! - [`config`] - Loop configuration and validation
//! - [`error`] - Custom error types and exit codes
//! - [`orchestrator`] - The loop itself plus real collaborator implementations
//! - [`ratelimit`] - Hourly call budget with window resets
//! - [`session`] - Continuation-token lifecycle across iterations
//! - [`signals`] - Rolling exit-signal aggregation
//! - [`storage`] - Atomic JSON persistence and the state-directory lock
//! - [`testing`] - Collaborator traits and mocks
//!
//! # Example
//!
//! ```rust,ignore
//! use vigil::config::LoopConfig;
//! use vigil::orchestrator::{Collaborators, LoopOrchestrator};
//!
//! let config = LoopConfig::new(".");
//! let collaborators = vigil::orchestrator::operations::standard(&config)?;
//! let mut orchestrator = LoopOrchestrator::new(config, collaborators)?;
//! let reason = orchestrator.run().await?;
//! println!("loop finished: {reason}");
//! ```

pub mod analyzer;
pub mod breaker;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod ratelimit;
pub mod session;
pub mod signals;
pub mod storage;
pub mod testing;

// Re-export commonly used types
pub use error::{Result, VigilError};

// Re-export config types
pub use config::{LoopConfig, OutputFormat, STATE_DIR_NAME};

// Re-export the analyzer surface
pub use analyzer::{OutputKind, ResponseAnalysis, ResponseAnalyzer};

// Re-export breaker types
pub use breaker::{CircuitBreaker, CircuitState, LoopResultEvent};

// Re-export exit aggregation types
pub use signals::{ExitReason, ExitSignalAggregator};

// Re-export the orchestrator surface
pub use orchestrator::{
    Collaborators, InvocationOutcome, LoopOrchestrator, StatusSnapshot, StatusWriter,
};

// Re-export testing traits for downstream harnesses
pub use testing::{
    AgentOutput, AgentRunner, ChangeCounter, ChecklistCounts, OperatorChoice, OperatorPrompt,
    ProgressDisplay, TaskListSource,
};
