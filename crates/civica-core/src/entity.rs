//! Administrable entities: subjects, groups, grants, assignments, documents.
//!
//! All of these rows are soft-deleted: `deleted_at` is set instead of the
//! row being removed. The [`Liveness`] trait is the single definition of
//! what "live" means; every store lookup applies it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Action, AssignmentId, DocumentId, GrantId, GroupId, Resource, SubjectId};

/// The centralized live-row predicate.
///
/// A row is live when its `active` flag is set and it has not been
/// soft-deleted. Rows that are not live are treated as absent by the
/// resolver and by all store lookups, never as errors.
pub trait Liveness {
    /// The entity's active/inactive flag.
    fn active(&self) -> bool;

    /// Soft-deletion timestamp (Unix ms), `None` for live rows.
    fn deleted_at(&self) -> Option<i64>;

    /// Whether the row participates in lookups and authorization.
    fn is_live(&self) -> bool {
        self.active() && self.deleted_at().is_none()
    }
}

/// An authenticated actor.
///
/// Subjects are handed to the engine by the identity provider already
/// verified; the engine trusts the identity and only evaluates grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    /// Unique email-like handle, e.g. `"clerk@records.gov"`.
    pub handle: String,
    pub display_name: String,
    pub active: bool,
    /// At most one group membership at a time.
    pub group_id: Option<GroupId>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

/// Input for creating a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectDraft {
    pub handle: String,
    pub display_name: String,
    pub group_id: Option<GroupId>,
}

/// Partial update of a subject. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectPatch {
    pub display_name: Option<String>,
    pub active: Option<bool>,
    /// `Some(None)` clears the membership, `Some(Some(id))` moves the
    /// subject to another group.
    pub group_id: Option<Option<GroupId>>,
}

/// Organizational unit (the service calls these "sectors").
///
/// A group owns zero or more permission grants; subjects belong to at
/// most one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    /// Unique group name, e.g. `"registry-office"`.
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

/// Input for creating a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDraft {
    pub name: String,
    pub description: Option<String>,
}

/// A (resource, action) pair marked allowed for a group.
///
/// At most one live grant exists per (group, resource, action); the
/// storage layer enforces this with a partial unique index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub id: GrantId,
    pub group_id: GroupId,
    pub resource: Resource,
    pub action: Action,
    pub active: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

/// Input for creating a permission grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantDraft {
    pub group_id: GroupId,
    pub resource: Resource,
    pub action: Action,
}

/// A direct subject-to-grant link, bypassing group membership.
///
/// At most one row exists per (subject, grant); re-assigning an inactive
/// link reactivates it instead of inserting a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectGrantAssignment {
    pub id: AssignmentId,
    pub subject_id: SubjectId,
    pub grant_id: GrantId,
    pub active: bool,
    pub created_at: i64,
}

/// A generic business entity row.
///
/// Business mutation handlers (cemetery, ticket, article, ...) write their
/// payloads as JSON documents so the coordinator can wrap any of them in
/// the same transaction without knowing their schemas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    /// Entity type tag, e.g. `"cemetery"` or `"ticket"`.
    pub entity_type: String,
    pub data: Value,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl Liveness for Subject {
    fn active(&self) -> bool {
        self.active
    }

    fn deleted_at(&self) -> Option<i64> {
        self.deleted_at
    }
}

impl Liveness for Group {
    fn active(&self) -> bool {
        self.active
    }

    fn deleted_at(&self) -> Option<i64> {
        self.deleted_at
    }
}

impl Liveness for PermissionGrant {
    fn active(&self) -> bool {
        self.active
    }

    fn deleted_at(&self) -> Option<i64> {
        self.deleted_at
    }
}

impl Liveness for SubjectGrantAssignment {
    fn active(&self) -> bool {
        self.active
    }

    // Assignments have no soft-delete timestamp of their own; they are
    // deactivated via the flag and follow the lifecycles of their subject
    // and grant.
    fn deleted_at(&self) -> Option<i64> {
        None
    }
}

impl Liveness for Document {
    fn active(&self) -> bool {
        true
    }

    fn deleted_at(&self) -> Option<i64> {
        self.deleted_at
    }
}

impl PermissionGrant {
    /// Whether this grant covers the requested (resource, action) pair.
    pub fn covers(&self, resource: &Resource, action: &Action) -> bool {
        &self.resource == resource && &self.action == action
    }
}
