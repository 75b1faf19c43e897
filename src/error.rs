//! Error types for the assistant orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {

    // =============================
    // Domain Errors
    // =============================

    /// A required field is missing or an input value is out of range.
    /// Reported immediately, before any side effect is attempted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown conversation thread.
    #[error("Thread not found: {0}")]
    NotFound(String),

    /// Checkpoint unknown to the external task (never started, or already terminal).
    #[error("Checkpoint not found: {0}")]
    ResumeNotFound(String),

    /// The external task reported a failure. Not retried by this layer.
    #[error("Workflow failed: {0}")]
    WorkflowFailed(String),

    /// The external service answered with a non-success outcome.
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// A write to the thread store failed. Best-effort call sites log and swallow
    /// this; everywhere else it propagates.
    #[error("Persistence error: {0}")]
    Persistence(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
