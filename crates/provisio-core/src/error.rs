//! Error taxonomy for the orchestration core.

use thiserror::Error;

use crate::types::DeploymentStatus;

/// Result type alias for orchestration operations.
pub type ProvisioResult<T> = Result<T, ProvisioError>;

/// Errors surfaced by the version store, pipeline, and state machine.
#[derive(Debug, Error)]
pub enum ProvisioError {
    /// A referenced design, version, or deployment does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// An operation was attempted from a status that does not allow it.
    #[error("cannot {operation} deployment {id} in status {status}")]
    InvalidState {
        id: String,
        operation: &'static str,
        status: DeploymentStatus,
    },

    #[error("unsupported tool: {0}")]
    UnsupportedTool(String),

    /// An external process exceeded its deadline.
    #[error("step `{step}` timed out after {timeout_secs}s")]
    ExecutionTimeout {
        step: String,
        timeout_secs: u64,
        log: String,
    },

    /// An external process exited nonzero. `log` holds every step section
    /// up to and including the failing one.
    #[error("step `{step}` failed")]
    ExecutionFailure { step: String, log: String },

    /// Rollback was requested but neither the workspace nor a persisted
    /// state snapshot is available.
    #[error("workspace for deployment {0} no longer exists and no state snapshot was persisted")]
    WorkspaceMissing(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("text generation failed: {0}")]
    Generation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisioError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        ProvisioError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid_state(
        id: impl Into<String>,
        operation: &'static str,
        status: DeploymentStatus,
    ) -> Self {
        ProvisioError::InvalidState {
            id: id.into(),
            operation,
            status,
        }
    }

    /// Partial pipeline log carried by execution errors, if any.
    pub fn log(&self) -> Option<&str> {
        match self {
            ProvisioError::ExecutionTimeout { log, .. }
            | ProvisioError::ExecutionFailure { log, .. } => Some(log),
            _ => None,
        }
    }
}
