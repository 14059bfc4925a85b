//! Error types for the conduit operator

use thiserror::Error;

/// Main error type for conduit operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for CRD specs or missing references
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g. "renderer", "oracle")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an internal error with context
    pub fn internal(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Error returned from controller reconcile functions
///
/// Carries only strings so it stays cheap to clone into logs and
/// independent of which collaborator produced the failure.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Kubernetes API failure (fetch, apply, conflict)
    #[error("kubernetes error: {0}")]
    Kube(String),

    /// The resource or something it references is invalid
    #[error("validation error: {0}")]
    Validation(String),

    /// Anything else
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<Error> for ReconcileError {
    fn from(e: Error) -> Self {
        match e {
            Error::Kube(e) => Self::Kube(e.to_string()),
            Error::Validation(msg) => Self::Validation(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}
