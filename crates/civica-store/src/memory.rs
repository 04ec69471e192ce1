//! In-memory implementation of the Store trait.
//!
//! Backed by plain maps behind a mutex. Transactionality is by
//! copy-on-write: a coordinated mutation runs against a clone of the
//! state, and the clone replaces the original only after the audit record
//! has been appended. Useful for tests and ephemeral deployments.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use civica_core::{
    Action, AssignmentId, AuditDraft, AuditFilter, AuditId, AuditRecord, Document, DocumentId,
    GrantDraft, GrantId, Group, GroupDraft, GroupId, Liveness, PermissionGrant, Resource, Subject,
    SubjectDraft, SubjectGrantAssignment, SubjectId, SubjectPatch,
};

use crate::error::{Result, StoreError};
use crate::now_millis;
use crate::traits::{
    AssignOutcome, GrantSource, MutationFn, MutationOutput, Store, StoreTxn, DEFAULT_AUDIT_LIMIT,
};

/// In-memory store. Cheap to construct, nothing survives a drop.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    fail_next_audit: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next audit append fail, for exercising rollback paths.
    pub fn fail_next_audit_append(&self) {
        self.fail_next_audit.store(true, Ordering::SeqCst);
    }

    fn take_audit_fault(&self) -> bool {
        self.fail_next_audit.swap(false, Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("state mutex poisoned".to_string()))
    }
}

#[derive(Debug, Default, Clone)]
struct MemoryInner {
    subjects: BTreeMap<i64, Subject>,
    groups: BTreeMap<i64, Group>,
    grants: BTreeMap<i64, PermissionGrant>,
    assignments: BTreeMap<i64, SubjectGrantAssignment>,
    documents: BTreeMap<i64, Document>,
    audit: Vec<AuditRecord>,
    next_id: i64,
}

impl MemoryInner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn live_subject(&self, id: SubjectId) -> Option<&Subject> {
        self.subjects.get(&id.get()).filter(|s| s.is_live())
    }

    fn live_group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id.get()).filter(|g| g.is_live())
    }

    fn live_grant(&self, id: GrantId) -> Option<&PermissionGrant> {
        self.grants.get(&id.get()).filter(|g| g.is_live())
    }

    fn direct_grant(
        &self,
        subject_id: SubjectId,
        resource: &Resource,
        action: &Action,
    ) -> Option<&PermissionGrant> {
        self.assignments
            .values()
            .filter(|a| a.subject_id == subject_id && a.active)
            .filter_map(|a| self.live_grant(a.grant_id))
            .find(|g| g.covers(resource, action))
    }

    fn group_grant(
        &self,
        group_id: GroupId,
        resource: &Resource,
        action: &Action,
    ) -> Option<&PermissionGrant> {
        self.grants
            .values()
            .filter(|g| g.group_id == group_id && g.is_live())
            .find(|g| g.covers(resource, action))
    }

    fn insert_subject(&mut self, draft: &SubjectDraft, now: i64) -> Result<Subject> {
        // Handles are unique absolutely, soft-deleted rows included
        if self.subjects.values().any(|s| s.handle == draft.handle) {
            return Err(StoreError::Conflict(format!(
                "handle already taken: {}",
                draft.handle
            )));
        }
        if let Some(group_id) = draft.group_id {
            if self.live_group(group_id).is_none() {
                return Err(StoreError::NotFound(format!("group {group_id}")));
            }
        }

        let subject = Subject {
            id: SubjectId(self.next_id()),
            handle: draft.handle.clone(),
            display_name: draft.display_name.clone(),
            active: true,
            group_id: draft.group_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.subjects.insert(subject.id.get(), subject.clone());
        Ok(subject)
    }

    fn update_subject(&mut self, id: SubjectId, patch: &SubjectPatch, now: i64) -> Result<Subject> {
        if let Some(Some(target)) = patch.group_id {
            if self.live_group(target).is_none() {
                return Err(StoreError::NotFound(format!("group {target}")));
            }
        }

        let subject = self
            .subjects
            .get_mut(&id.get())
            .filter(|s| s.deleted_at.is_none())
            .ok_or_else(|| StoreError::NotFound(format!("subject {id}")))?;

        if let Some(display_name) = &patch.display_name {
            subject.display_name = display_name.clone();
        }
        if let Some(active) = patch.active {
            subject.active = active;
        }
        if let Some(group_id) = patch.group_id {
            subject.group_id = group_id;
        }
        subject.updated_at = now;
        Ok(subject.clone())
    }

    fn soft_delete_subject(&mut self, id: SubjectId, now: i64) -> Result<()> {
        let subject = self
            .subjects
            .get_mut(&id.get())
            .filter(|s| s.deleted_at.is_none())
            .ok_or_else(|| StoreError::NotFound(format!("subject {id}")))?;
        subject.deleted_at = Some(now);
        subject.updated_at = now;
        Ok(())
    }

    fn insert_group(&mut self, draft: &GroupDraft, now: i64) -> Result<Group> {
        if self.groups.values().any(|g| g.name == draft.name) {
            return Err(StoreError::Conflict(format!(
                "group name already taken: {}",
                draft.name
            )));
        }

        let group = Group {
            id: GroupId(self.next_id()),
            name: draft.name.clone(),
            description: draft.description.clone(),
            active: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.groups.insert(group.id.get(), group.clone());
        Ok(group)
    }

    fn soft_delete_group(&mut self, id: GroupId, now: i64) -> Result<()> {
        let group = self
            .groups
            .get_mut(&id.get())
            .filter(|g| g.deleted_at.is_none())
            .ok_or_else(|| StoreError::NotFound(format!("group {id}")))?;
        group.deleted_at = Some(now);
        group.updated_at = now;

        for grant in self
            .grants
            .values_mut()
            .filter(|g| g.group_id == id && g.deleted_at.is_none())
        {
            grant.deleted_at = Some(now);
            grant.updated_at = now;
        }
        Ok(())
    }

    fn insert_grant(&mut self, draft: &GrantDraft, now: i64) -> Result<PermissionGrant> {
        if self.live_group(draft.group_id).is_none() {
            return Err(StoreError::NotFound(format!("group {}", draft.group_id)));
        }
        // One live grant per (group, resource, action)
        if self.grants.values().any(|g| {
            g.group_id == draft.group_id
                && g.deleted_at.is_none()
                && g.resource == draft.resource
                && g.action == draft.action
        }) {
            return Err(StoreError::Conflict(format!(
                "live grant already exists for {}:{}",
                draft.resource, draft.action
            )));
        }

        let grant = PermissionGrant {
            id: GrantId(self.next_id()),
            group_id: draft.group_id,
            resource: draft.resource.clone(),
            action: draft.action.clone(),
            active: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.grants.insert(grant.id.get(), grant.clone());
        Ok(grant)
    }

    fn set_grant_active(&mut self, id: GrantId, active: bool, now: i64) -> Result<PermissionGrant> {
        let grant = self
            .grants
            .get_mut(&id.get())
            .filter(|g| g.deleted_at.is_none())
            .ok_or_else(|| StoreError::NotFound(format!("grant {id}")))?;
        grant.active = active;
        grant.updated_at = now;
        Ok(grant.clone())
    }

    fn soft_delete_grant(&mut self, id: GrantId, now: i64) -> Result<()> {
        let grant = self
            .grants
            .get_mut(&id.get())
            .filter(|g| g.deleted_at.is_none())
            .ok_or_else(|| StoreError::NotFound(format!("grant {id}")))?;
        grant.deleted_at = Some(now);
        grant.updated_at = now;
        Ok(())
    }

    fn assign(&mut self, subject_id: SubjectId, grant_id: GrantId, now: i64) -> Result<AssignOutcome> {
        if self.live_subject(subject_id).is_none() {
            return Err(StoreError::NotFound(format!("subject {subject_id}")));
        }
        if self.live_grant(grant_id).is_none() {
            return Err(StoreError::NotFound(format!("grant {grant_id}")));
        }

        if let Some(existing) = self
            .assignments
            .values_mut()
            .find(|a| a.subject_id == subject_id && a.grant_id == grant_id)
        {
            if existing.active {
                return Ok(AssignOutcome::AlreadyActive(existing.clone()));
            }
            existing.active = true;
            return Ok(AssignOutcome::Reactivated(existing.clone()));
        }

        let assignment = SubjectGrantAssignment {
            id: AssignmentId(self.next_id()),
            subject_id,
            grant_id,
            active: true,
            created_at: now,
        };
        self.assignments
            .insert(assignment.id.get(), assignment.clone());
        Ok(AssignOutcome::Created(assignment))
    }

    fn revoke(&mut self, subject_id: SubjectId, grant_id: GrantId) -> Result<bool> {
        let Some(existing) = self
            .assignments
            .values_mut()
            .find(|a| a.subject_id == subject_id && a.grant_id == grant_id && a.active)
        else {
            return Ok(false);
        };
        existing.active = false;
        Ok(true)
    }

    fn insert_document(&mut self, entity_type: &str, data: &Value, now: i64) -> Result<Document> {
        let document = Document {
            id: DocumentId(self.next_id()),
            entity_type: entity_type.to_string(),
            data: data.clone(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.documents.insert(document.id.get(), document.clone());
        Ok(document)
    }

    fn update_document(&mut self, id: DocumentId, data: &Value, now: i64) -> Result<Document> {
        let document = self
            .documents
            .get_mut(&id.get())
            .filter(|d| d.deleted_at.is_none())
            .ok_or_else(|| StoreError::NotFound(format!("document {id}")))?;
        document.data = data.clone();
        document.updated_at = now;
        Ok(document.clone())
    }

    fn soft_delete_document(&mut self, id: DocumentId, now: i64) -> Result<()> {
        let document = self
            .documents
            .get_mut(&id.get())
            .filter(|d| d.deleted_at.is_none())
            .ok_or_else(|| StoreError::NotFound(format!("document {id}")))?;
        document.deleted_at = Some(now);
        document.updated_at = now;
        Ok(())
    }

    fn append_audit(&mut self, draft: &AuditDraft, now: i64) -> AuditRecord {
        let record = AuditRecord {
            id: AuditId(self.next_id()),
            subject_id: draft.subject_id,
            action: draft.action.clone(),
            entity_type: draft.entity_type.clone(),
            entity_id: draft.entity_id,
            detail: draft.detail.clone(),
            origin: draft.origin.clone(),
            created_at: now,
        };
        self.audit.push(record.clone());
        record
    }

    fn list_audit(&self, filter: &AuditFilter) -> Vec<AuditRecord> {
        let offset = filter.offset.unwrap_or(0) as usize;
        let limit = filter.limit.unwrap_or(DEFAULT_AUDIT_LIMIT) as usize;
        self.audit
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }
}

struct MemoryTxn<'a> {
    inner: &'a mut MemoryInner,
    now: i64,
}

impl StoreTxn for MemoryTxn<'_> {
    fn now(&self) -> i64 {
        self.now
    }

    fn insert_subject(&mut self, draft: &SubjectDraft) -> Result<Subject> {
        self.inner.insert_subject(draft, self.now)
    }

    fn update_subject(&mut self, id: SubjectId, patch: &SubjectPatch) -> Result<Subject> {
        self.inner.update_subject(id, patch, self.now)
    }

    fn soft_delete_subject(&mut self, id: SubjectId) -> Result<()> {
        self.inner.soft_delete_subject(id, self.now)
    }

    fn insert_group(&mut self, draft: &GroupDraft) -> Result<Group> {
        self.inner.insert_group(draft, self.now)
    }

    fn soft_delete_group(&mut self, id: GroupId) -> Result<()> {
        self.inner.soft_delete_group(id, self.now)
    }

    fn insert_grant(&mut self, draft: &GrantDraft) -> Result<PermissionGrant> {
        self.inner.insert_grant(draft, self.now)
    }

    fn set_grant_active(&mut self, id: GrantId, active: bool) -> Result<PermissionGrant> {
        self.inner.set_grant_active(id, active, self.now)
    }

    fn soft_delete_grant(&mut self, id: GrantId) -> Result<()> {
        self.inner.soft_delete_grant(id, self.now)
    }

    fn assign(&mut self, subject_id: SubjectId, grant_id: GrantId) -> Result<AssignOutcome> {
        self.inner.assign(subject_id, grant_id, self.now)
    }

    fn revoke(&mut self, subject_id: SubjectId, grant_id: GrantId) -> Result<bool> {
        self.inner.revoke(subject_id, grant_id)
    }

    fn insert_document(&mut self, entity_type: &str, data: &Value) -> Result<Document> {
        self.inner.insert_document(entity_type, data, self.now)
    }

    fn update_document(&mut self, id: DocumentId, data: &Value) -> Result<Document> {
        self.inner.update_document(id, data, self.now)
    }

    fn soft_delete_document(&mut self, id: DocumentId) -> Result<()> {
        self.inner.soft_delete_document(id, self.now)
    }

    fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        Ok(self
            .inner
            .documents
            .get(&id.get())
            .filter(|d| d.deleted_at.is_none())
            .cloned())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_subject(&self, id: SubjectId) -> Result<Option<Subject>> {
        Ok(self.lock()?.live_subject(id).cloned())
    }

    async fn find_subject_by_handle(&self, handle: &str) -> Result<Option<Subject>> {
        Ok(self
            .lock()?
            .subjects
            .values()
            .find(|s| s.handle == handle && s.is_live())
            .cloned())
    }

    async fn find_group(&self, id: GroupId) -> Result<Option<Group>> {
        Ok(self.lock()?.live_group(id).cloned())
    }

    async fn find_grant(&self, id: GrantId) -> Result<Option<PermissionGrant>> {
        Ok(self.lock()?.live_grant(id).cloned())
    }

    async fn list_group_grants(&self, group_id: GroupId) -> Result<Vec<PermissionGrant>> {
        Ok(self
            .lock()?
            .grants
            .values()
            .filter(|g| g.group_id == group_id && g.is_live())
            .cloned()
            .collect())
    }

    async fn find_direct_grant(
        &self,
        subject_id: SubjectId,
        resource: &Resource,
        action: &Action,
    ) -> Result<Option<PermissionGrant>> {
        Ok(self.lock()?.direct_grant(subject_id, resource, action).cloned())
    }

    async fn find_group_grant(
        &self,
        group_id: GroupId,
        resource: &Resource,
        action: &Action,
    ) -> Result<Option<PermissionGrant>> {
        Ok(self.lock()?.group_grant(group_id, resource, action).cloned())
    }

    async fn find_effective_grant(
        &self,
        subject: &Subject,
        resource: &Resource,
        action: &Action,
    ) -> Result<Option<GrantSource>> {
        let inner = self.lock()?;
        if let Some(grant) = inner.direct_grant(subject.id, resource, action) {
            return Ok(Some(GrantSource::Direct(grant.clone())));
        }
        if let Some(group_id) = subject.group_id {
            if let Some(grant) = inner.group_grant(group_id, resource, action) {
                return Ok(Some(GrantSource::Group(grant.clone())));
            }
        }
        Ok(None)
    }

    async fn assign(&self, subject_id: SubjectId, grant_id: GrantId) -> Result<AssignOutcome> {
        self.lock()?.assign(subject_id, grant_id, now_millis())
    }

    async fn revoke(&self, subject_id: SubjectId, grant_id: GrantId) -> Result<bool> {
        self.lock()?.revoke(subject_id, grant_id)
    }

    async fn list_assignments(
        &self,
        subject_id: SubjectId,
    ) -> Result<Vec<SubjectGrantAssignment>> {
        Ok(self
            .lock()?
            .assignments
            .values()
            .filter(|a| a.subject_id == subject_id)
            .cloned()
            .collect())
    }

    async fn append_audit(&self, draft: AuditDraft) -> Result<AuditRecord> {
        if self.take_audit_fault() {
            return Err(StoreError::Recording("injected audit failure".to_string()));
        }
        Ok(self.lock()?.append_audit(&draft, now_millis()))
    }

    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
        Ok(self.lock()?.list_audit(filter))
    }

    async fn mutate_with_audit(
        &self,
        draft: AuditDraft,
        mutation: MutationFn,
    ) -> Result<(MutationOutput, AuditRecord)> {
        let mut guard = self.lock()?;
        let mut scratch = guard.clone();
        let now = now_millis();

        let output = {
            let mut scope = MemoryTxn {
                inner: &mut scratch,
                now,
            };
            mutation(&mut scope).map_err(StoreError::Mutation)?
        };

        let mut draft = draft;
        if draft.entity_id.is_none() {
            draft.entity_id = output.entity_id;
        }

        // Scratch state is discarded unless the audit append succeeds.
        if self.take_audit_fault() {
            return Err(StoreError::Recording("injected audit failure".to_string()));
        }
        let record = scratch.append_audit(&draft, now);

        *guard = scratch;
        Ok((output, record))
    }
}
