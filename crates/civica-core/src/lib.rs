//! # Civica Core
//!
//! Pure domain types for the Civica access engine: subjects, groups,
//! permission grants, assignments, audit records, and authorization
//! decisions.
//!
//! This crate contains no I/O, no storage, no transport. It is pure data
//! plus the small amount of logic that belongs to the data itself (liveness,
//! decision reasons, input validation).
//!
//! ## Key Types
//!
//! - [`Subject`] - An authenticated actor making requests
//! - [`Group`] - Organizational unit ("sector") that owns permission grants
//! - [`PermissionGrant`] - A (resource, action) pair allowed for a group
//! - [`SubjectGrantAssignment`] - A direct subject-to-grant link
//! - [`AuditRecord`] - Immutable record of a completed, authorized mutation
//! - [`Decision`] - The outcome of an authorization check, with its reason
//!
//! ## Soft Deletion
//!
//! Every administrable entity carries an `active` flag and a nullable
//! `deleted_at` timestamp. The [`Liveness`] trait centralizes the "live"
//! predicate; rows that fail it are treated as absent everywhere.

pub mod audit;
pub mod decision;
pub mod entity;
pub mod error;
pub mod types;

pub use audit::{AuditDraft, AuditFilter, AuditRecord};
pub use decision::{AllowReason, Decision, DenyReason};
pub use entity::{
    Document, Group, GroupDraft, GrantDraft, Liveness, PermissionGrant, Subject, SubjectDraft,
    SubjectGrantAssignment, SubjectPatch,
};
pub use error::CoreError;
pub use types::{
    Action, AssignmentId, AuditId, DocumentId, GrantId, GroupId, Resource, SubjectId,
};
