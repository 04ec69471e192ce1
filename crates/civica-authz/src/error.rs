//! Error types for authorization resolution.

use thiserror::Error;

/// Errors that can occur while resolving a decision.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// The subject does not exist or is not live.
    #[error("unknown subject: {0}")]
    UnknownSubject(String),

    /// The grant store failed.
    #[error(transparent)]
    Store(#[from] civica_store::StoreError),
}

impl AuthzError {
    /// Whether the caller may retry the operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthzError::Store(e) if e.is_transient())
    }
}

/// Result type for authorization operations.
pub type Result<T> = std::result::Result<T, AuthzError>;
