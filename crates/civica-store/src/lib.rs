//! Storage layer for the Civica access engine.
//!
//! Persistence for subjects, groups ("sectors"), permission grants, direct
//! assignments, business documents, and the append-only audit trail. Two
//! backends implement the same [`Store`] trait:
//!
//! - [`SqliteStore`]: SQLite-backed, the production default. Uniqueness
//!   and soft-delete semantics are enforced by the schema itself.
//! - [`MemoryStore`]: map-backed, for tests and ephemeral runs.
//!
//! The contract both share: lookups only ever see live rows, `assign` is
//! idempotent under concurrency, and [`Store::mutate_with_audit`] commits
//! a business mutation and its audit record atomically — if the record
//! cannot be written, the mutation does not happen.

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    AssignOutcome, GrantSource, MutationFn, MutationOutput, Store, StoreTxn, DEFAULT_AUDIT_LIMIT,
};

/// Current Unix time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as i64
}
