//! Error types for the engine API.
//!
//! The engine flattens the lower layers into one taxonomy so that an
//! embedding application can map variants straight onto its own status
//! codes (denied, missing, conflict, retryable, and so on).

use thiserror::Error;

use civica_authz::AuthzError;
use civica_core::CoreError;
use civica_store::StoreError;

/// Errors returned by the engine API.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The actor is not authorized for the operation. Carries the
    /// machine-readable deny reason from the resolver.
    #[error("denied: {handle} may not {action} on {resource} ({reason})")]
    Denied {
        handle: String,
        resource: String,
        action: String,
        reason: &'static str,
    },

    /// A referenced entity is absent or soft-deleted.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness rule was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The audit record could not be committed; the mutation was rolled
    /// back with it.
    #[error("audit recording failed: {0}")]
    Recording(String),

    /// The business mutation itself failed; nothing was written.
    #[error("mutation failed: {0}")]
    Mutation(#[source] anyhow::Error),

    /// A malformed resource or action name.
    #[error(transparent)]
    Invalid(#[from] CoreError),

    /// Transient storage condition; retryable with backoff.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Any other storage failure.
    #[error(transparent)]
    Store(StoreError),
}

impl EngineError {
    /// Whether the caller may retry the operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Unavailable(_))
    }

    /// Whether this is an authorization denial (as opposed to a fault).
    pub fn is_denied(&self) -> bool {
        matches!(self, EngineError::Denied { .. })
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(m) => EngineError::NotFound(m),
            StoreError::Conflict(m) => EngineError::Conflict(m),
            StoreError::Recording(m) => EngineError::Recording(m),
            // A store failure raised inside a mutation closure comes back
            // wrapped; unwrap it so NotFound/Conflict keep their meaning.
            StoreError::Mutation(e) => match e.downcast::<StoreError>() {
                Ok(inner) => EngineError::from(inner),
                Err(e) => EngineError::Mutation(e),
            },
            StoreError::Unavailable(m) => EngineError::Unavailable(m),
            other => EngineError::Store(other),
        }
    }
}

impl From<AuthzError> for EngineError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::UnknownSubject(m) => EngineError::NotFound(format!("subject {m}")),
            AuthzError::Store(e) => EngineError::from(e),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
