//! Error types for the core domain.

use thiserror::Error;

/// Validation failures on core value types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A resource name was empty or padded with whitespace.
    #[error("invalid resource name: {0:?}")]
    InvalidResource(String),

    /// An action verb was empty or padded with whitespace.
    #[error("invalid action verb: {0:?}")]
    InvalidAction(String),
}
