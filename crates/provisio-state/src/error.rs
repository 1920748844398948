//! Error types for the Provisio state store.

use provisio_core::ProvisioError;
use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Raised from inside a `modify_deployment` closure; the transaction is
    /// aborted and the wrapped error handed back unchanged.
    #[error(transparent)]
    Rejected(Box<ProvisioError>),
}

impl From<StateError> for ProvisioError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound { kind, id } => ProvisioError::NotFound { kind, id },
            StateError::Rejected(inner) => *inner,
            other => ProvisioError::Storage(other.to_string()),
        }
    }
}
