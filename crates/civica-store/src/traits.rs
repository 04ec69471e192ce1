//! Store traits: the abstract interface for grant and audit persistence.
//!
//! [`Store`] is the async read/write surface used by the resolver and the
//! engine. [`StoreTxn`] is the synchronous, object-safe surface handed to
//! business mutations running inside a store transaction, so that a
//! mutation and its audit record commit or roll back together.

use async_trait::async_trait;
use serde_json::Value;

use civica_core::{
    Action, AuditDraft, AuditFilter, AuditRecord, Document, DocumentId, GrantDraft, GrantId,
    Group, GroupDraft, GroupId, PermissionGrant, Resource, Subject, SubjectDraft,
    SubjectGrantAssignment, SubjectId, SubjectPatch,
};

use crate::error::Result;

/// Default cap on audit listings when the filter sets no limit.
pub const DEFAULT_AUDIT_LIMIT: u32 = 100;

/// Result of an idempotent assign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignOutcome {
    /// No row existed; one was created.
    Created(SubjectGrantAssignment),
    /// An inactive row existed and was reactivated.
    Reactivated(SubjectGrantAssignment),
    /// The row was already active (idempotent no-op).
    AlreadyActive(SubjectGrantAssignment),
}

impl AssignOutcome {
    /// The assignment row after the operation.
    pub fn assignment(&self) -> &SubjectGrantAssignment {
        match self {
            AssignOutcome::Created(a)
            | AssignOutcome::Reactivated(a)
            | AssignOutcome::AlreadyActive(a) => a,
        }
    }
}

/// Where an effective grant came from, in precedence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantSource {
    /// A live direct assignment matched first.
    Direct(PermissionGrant),
    /// A live grant owned by the subject's group matched.
    Group(PermissionGrant),
}

impl GrantSource {
    /// The matched grant.
    pub fn grant(&self) -> &PermissionGrant {
        match self {
            GrantSource::Direct(g) | GrantSource::Group(g) => g,
        }
    }
}

/// What a business mutation hands back to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutput {
    /// Id of the affected entity, when the caller did not know it up
    /// front (creates). Used to complete the audit record.
    pub entity_id: Option<i64>,
    /// The mutation's own result payload, passed through to the caller.
    pub value: Value,
}

impl MutationOutput {
    /// An output with no entity reference.
    pub fn new(value: Value) -> Self {
        Self {
            entity_id: None,
            value,
        }
    }

    /// Reference the entity the mutation affected.
    pub fn entity(mut self, entity_id: i64) -> Self {
        self.entity_id = Some(entity_id);
        self
    }
}

/// A boxed business mutation, executed inside one store transaction.
///
/// The mutation's own failures are domain-specific and opaque to the
/// store, hence `anyhow::Error`.
pub type MutationFn =
    Box<dyn FnOnce(&mut dyn StoreTxn) -> anyhow::Result<MutationOutput> + Send + 'static>;

/// The transactional write surface visible to mutations.
///
/// Every method runs inside the transaction opened by
/// [`Store::mutate_with_audit`]; nothing is visible to other readers until
/// the audit record has been appended and the transaction committed.
pub trait StoreTxn {
    /// The transaction's timestamp (Unix ms), stable for its duration.
    fn now(&self) -> i64;

    fn insert_subject(&mut self, draft: &SubjectDraft) -> Result<Subject>;
    fn update_subject(&mut self, id: SubjectId, patch: &SubjectPatch) -> Result<Subject>;
    fn soft_delete_subject(&mut self, id: SubjectId) -> Result<()>;

    fn insert_group(&mut self, draft: &GroupDraft) -> Result<Group>;
    /// Soft-delete the group and cascade to its live grants.
    fn soft_delete_group(&mut self, id: GroupId) -> Result<()>;

    fn insert_grant(&mut self, draft: &GrantDraft) -> Result<PermissionGrant>;
    fn set_grant_active(&mut self, id: GrantId, active: bool) -> Result<PermissionGrant>;
    fn soft_delete_grant(&mut self, id: GrantId) -> Result<()>;

    fn assign(&mut self, subject_id: SubjectId, grant_id: GrantId) -> Result<AssignOutcome>;
    fn revoke(&mut self, subject_id: SubjectId, grant_id: GrantId) -> Result<bool>;

    fn insert_document(&mut self, entity_type: &str, data: &Value) -> Result<Document>;
    fn update_document(&mut self, id: DocumentId, data: &Value) -> Result<Document>;
    fn soft_delete_document(&mut self, id: DocumentId) -> Result<()>;
    fn get_document(&self, id: DocumentId) -> Result<Option<Document>>;
}

/// The Store trait: async interface for grant and audit persistence.
///
/// # Design Notes
///
/// - **Live rows only**: every lookup filters soft-deleted and inactive
///   rows; a dead row reads as absent, never as an error.
/// - **Idempotent assign**: `assign` is a store-level atomic upsert, safe
///   under concurrent callers targeting the same (subject, grant) pair.
/// - **Snapshot reads**: `find_effective_grant` resolves direct-then-group
///   against one consistent snapshot, never a torn read.
/// - **Atomic audit**: `mutate_with_audit` commits the business mutation
///   and its audit record together or not at all.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────
    // Entity Lookups
    // ─────────────────────────────────────────────────────────────────────

    /// Get a live subject by id.
    async fn find_subject(&self, id: SubjectId) -> Result<Option<Subject>>;

    /// Get a live subject by its unique handle.
    async fn find_subject_by_handle(&self, handle: &str) -> Result<Option<Subject>>;

    /// Get a live group by id.
    async fn find_group(&self, id: GroupId) -> Result<Option<Group>>;

    /// Get a live grant by id.
    async fn find_grant(&self, id: GrantId) -> Result<Option<PermissionGrant>>;

    /// List the live grants owned by a group.
    async fn list_group_grants(&self, group_id: GroupId) -> Result<Vec<PermissionGrant>>;

    // ─────────────────────────────────────────────────────────────────────
    // Grant Resolution
    // ─────────────────────────────────────────────────────────────────────

    /// Find a live grant reachable through a live direct assignment.
    async fn find_direct_grant(
        &self,
        subject_id: SubjectId,
        resource: &Resource,
        action: &Action,
    ) -> Result<Option<PermissionGrant>>;

    /// Find a live grant owned by the given group.
    async fn find_group_grant(
        &self,
        group_id: GroupId,
        resource: &Resource,
        action: &Action,
    ) -> Result<Option<PermissionGrant>>;

    /// Resolve the effective grant for a subject: direct first, then the
    /// subject's group. Both lookups observe the same snapshot.
    async fn find_effective_grant(
        &self,
        subject: &Subject,
        resource: &Resource,
        action: &Action,
    ) -> Result<Option<GrantSource>>;

    // ─────────────────────────────────────────────────────────────────────
    // Assignments
    // ─────────────────────────────────────────────────────────────────────

    /// Link a subject directly to a grant. Idempotent: an existing
    /// inactive link is reactivated, an active one is returned unchanged.
    /// Both the subject and the grant must be live.
    async fn assign(&self, subject_id: SubjectId, grant_id: GrantId) -> Result<AssignOutcome>;

    /// Deactivate a direct link. Returns `false` when no active link
    /// existed.
    async fn revoke(&self, subject_id: SubjectId, grant_id: GrantId) -> Result<bool>;

    /// List all assignment rows for a subject, active or not.
    async fn list_assignments(&self, subject_id: SubjectId)
        -> Result<Vec<SubjectGrantAssignment>>;

    // ─────────────────────────────────────────────────────────────────────
    // Audit Trail
    // ─────────────────────────────────────────────────────────────────────

    /// Append a standalone audit record (non-mutating events such as
    /// logins). The store assigns id and creation timestamp.
    async fn append_audit(&self, draft: AuditDraft) -> Result<AuditRecord>;

    /// List audit records matching the filter, newest first.
    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>>;

    // ─────────────────────────────────────────────────────────────────────
    // Coordinated Mutation
    // ─────────────────────────────────────────────────────────────────────

    /// Run `mutation` and append `draft` in one transaction.
    ///
    /// The draft's `entity_id` is completed from the mutation's output
    /// when the caller left it unset. Failure modes:
    ///
    /// - mutation fails → rollback, no audit, [`StoreError::Mutation`];
    /// - audit append or commit fails → rollback,
    ///   [`StoreError::Recording`]; the mutation's effects are not
    ///   observable afterwards.
    ///
    /// [`StoreError::Mutation`]: crate::StoreError::Mutation
    /// [`StoreError::Recording`]: crate::StoreError::Recording
    async fn mutate_with_audit(
        &self,
        draft: AuditDraft,
        mutation: MutationFn,
    ) -> Result<(MutationOutput, AuditRecord)>;
}
