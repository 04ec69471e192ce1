//! Civica access engine: authorization decisions with an atomic audit trail.
//!
//! The engine answers "may this subject perform this action on this
//! resource", and guarantees that every mutation it executes commits
//! together with an audit record describing it. If the record cannot be
//! written, the mutation is rolled back.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use civica::{AuditFilter, Engine, EngineConfig, GroupDraft, SqliteStore, Store};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteStore::open("access.db")?);
//! let engine = Engine::new(store, EngineConfig::with_privileged(["root@records.gov"]));
//!
//! let root = engine.store().find_subject_by_handle("root@records.gov").await?.unwrap();
//! let group = engine.create_group(&root, GroupDraft {
//!     name: "registry-office".to_string(),
//!     description: None,
//! }).await?;
//!
//! let trail = engine.audit_trail(&root, &AuditFilter::any()).await?;
//! assert_eq!(trail[0].entity_id, Some(group.id.get()));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};

// The vocabulary an embedding application needs, re-exported so most
// callers depend on this crate alone.
pub use civica_authz::{PrivilegedHandles, PrivilegedPredicate, Resolver};
pub use civica_core::{
    Action, AllowReason, AuditDraft, AuditFilter, AuditRecord, Decision, DenyReason, GrantDraft,
    GrantId, Group, GroupDraft, GroupId, PermissionGrant, Resource, Subject, SubjectDraft,
    SubjectGrantAssignment, SubjectId, SubjectPatch,
};
pub use civica_store::{
    AssignOutcome, GrantSource, MemoryStore, MutationFn, MutationOutput, SqliteStore, Store,
    StoreError, StoreTxn,
};
