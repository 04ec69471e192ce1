//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(rusqlite::Error),

    /// A referenced row is absent or soft-deleted.
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violation. Safe to retry as a re-check: the writes that
    /// can raise this (assign, grant creation) are idempotent at the
    /// contract level.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The audit record could not be durably committed. The enclosing
    /// mutation has been rolled back.
    #[error("audit recording failed: {0}")]
    Recording(String),

    /// The business mutation itself failed. The transaction was rolled
    /// back and no audit record was written.
    #[error("mutation failed: {0}")]
    Mutation(#[source] anyhow::Error),

    /// Transient condition (busy/locked/timeout). Retryable by the caller
    /// with backoff.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Invalid data in storage (e.g. a detail column that fails to parse).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether the caller may retry the operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

// Classify SQLite failures on the way out: busy/locked become transient,
// constraint violations become conflicts. Everything else is opaque.
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, ref message) = err {
            match code.code {
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    return StoreError::Unavailable(
                        message.clone().unwrap_or_else(|| code.to_string()),
                    );
                }
                rusqlite::ErrorCode::ConstraintViolation => {
                    return StoreError::Conflict(
                        message.clone().unwrap_or_else(|| code.to_string()),
                    );
                }
                _ => {}
            }
        }
        StoreError::Database(err)
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
