//! The access engine: authorization-gated, audited mutations.
//!
//! [`Engine::perform`] is the single write path. It resolves an access
//! decision for the actor, refuses denied requests before anything runs,
//! and otherwise executes the mutation together with its audit record in
//! one store transaction. The typed operations below (subjects, groups,
//! grants, assignments) are all built on it.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use civica_authz::Resolver;
use civica_core::{
    Action, AuditDraft, AuditFilter, AuditRecord, Decision, GrantDraft, GrantId, Group,
    GroupDraft, GroupId, PermissionGrant, Resource, Subject, SubjectDraft, SubjectGrantAssignment,
    SubjectId, SubjectPatch,
};
use civica_store::{AssignOutcome, MutationFn, MutationOutput, Store, StoreError};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// The unified engine API over a grant store.
pub struct Engine<S> {
    store: Arc<S>,
    resolver: Resolver<S>,
    origin: Option<String>,
}

impl<S: Store> Engine<S> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        let resolver = Resolver::new(Arc::clone(&store), Arc::new(config.privileged()));
        Self {
            store,
            resolver,
            origin: config.origin,
        }
    }

    /// The underlying store, for read-only lookups.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // ─────────────────────────────────────────────────────────────────────
    // Decisions
    // ─────────────────────────────────────────────────────────────────────

    /// Resolve a decision without enforcing it. Read-only and unaudited.
    pub async fn authorize(&self, actor: &Subject, resource: &str, action: &str) -> Result<Decision> {
        let (resource, action) = keys(resource, action)?;
        Ok(self.resolver.decide(actor, &resource, &action).await?)
    }

    /// Resolve a decision and turn a deny into [`EngineError::Denied`].
    async fn require(&self, actor: &Subject, resource: &Resource, action: &Action) -> Result<()> {
        let decision = self.resolver.decide(actor, resource, action).await?;
        if !decision.is_allow() {
            warn!(
                handle = %actor.handle,
                resource = %resource,
                action = %action,
                reason = decision.reason(),
                "request denied"
            );
            return Err(EngineError::Denied {
                handle: actor.handle.clone(),
                resource: resource.to_string(),
                action: action.to_string(),
                reason: decision.reason(),
            });
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // The write path
    // ─────────────────────────────────────────────────────────────────────

    /// Run an authorized, audited mutation.
    ///
    /// Order is strict: the decision comes first and a deny means the
    /// mutation never runs and nothing is recorded. On allow, the
    /// mutation and the audit record commit atomically; the record is
    /// attributed to `actor` regardless of what the draft carried.
    pub async fn perform(
        &self,
        actor: &Subject,
        resource: &str,
        action: &str,
        draft: AuditDraft,
        mutation: MutationFn,
    ) -> Result<(MutationOutput, AuditRecord)> {
        let (resource, action) = keys(resource, action)?;
        self.require(actor, &resource, &action).await?;

        let mut draft = draft.by(actor.id);
        if draft.origin.is_none() {
            draft.origin = self.origin.clone();
        }

        let (output, record) = self.store.mutate_with_audit(draft, mutation).await?;
        info!(
            handle = %actor.handle,
            action = %record.action,
            entity_type = %record.entity_type,
            entity_id = ?record.entity_id,
            audit_id = %record.id,
            "mutation committed"
        );
        Ok((output, record))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Subjects
    // ─────────────────────────────────────────────────────────────────────

    pub async fn create_subject(&self, actor: &Subject, draft: SubjectDraft) -> Result<Subject> {
        let detail = encode(&draft)?;
        let (output, _) = self
            .perform(
                actor,
                "subjects",
                "create",
                AuditDraft::new("create", "subject").detail(detail),
                Box::new(move |tx| {
                    let subject = tx.insert_subject(&draft)?;
                    Ok(MutationOutput::new(serde_json::to_value(&subject)?)
                        .entity(subject.id.get()))
                }),
            )
            .await?;
        decode(output.value)
    }

    pub async fn update_subject(
        &self,
        actor: &Subject,
        id: SubjectId,
        patch: SubjectPatch,
    ) -> Result<Subject> {
        let detail = encode(&patch)?;
        let (output, _) = self
            .perform(
                actor,
                "subjects",
                "update",
                AuditDraft::new("update", "subject").entity(id.get()).detail(detail),
                Box::new(move |tx| {
                    let subject = tx.update_subject(id, &patch)?;
                    Ok(MutationOutput::new(serde_json::to_value(&subject)?)
                        .entity(subject.id.get()))
                }),
            )
            .await?;
        decode(output.value)
    }

    pub async fn delete_subject(&self, actor: &Subject, id: SubjectId) -> Result<()> {
        self.perform(
            actor,
            "subjects",
            "delete",
            AuditDraft::new("delete", "subject").entity(id.get()),
            Box::new(move |tx| {
                tx.soft_delete_subject(id)?;
                Ok(MutationOutput::new(Value::Null))
            }),
        )
        .await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Groups
    // ─────────────────────────────────────────────────────────────────────

    pub async fn create_group(&self, actor: &Subject, draft: GroupDraft) -> Result<Group> {
        let detail = encode(&draft)?;
        let (output, _) = self
            .perform(
                actor,
                "groups",
                "create",
                AuditDraft::new("create", "group").detail(detail),
                Box::new(move |tx| {
                    let group = tx.insert_group(&draft)?;
                    Ok(MutationOutput::new(serde_json::to_value(&group)?).entity(group.id.get()))
                }),
            )
            .await?;
        decode(output.value)
    }

    /// Soft-delete a group; its live grants go with it. Existing audit
    /// records referencing the group are untouched.
    pub async fn delete_group(&self, actor: &Subject, id: GroupId) -> Result<()> {
        self.perform(
            actor,
            "groups",
            "delete",
            AuditDraft::new("delete", "group").entity(id.get()),
            Box::new(move |tx| {
                tx.soft_delete_group(id)?;
                Ok(MutationOutput::new(Value::Null))
            }),
        )
        .await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Grants
    // ─────────────────────────────────────────────────────────────────────

    pub async fn create_grant(&self, actor: &Subject, draft: GrantDraft) -> Result<PermissionGrant> {
        let detail = encode(&draft)?;
        let (output, _) = self
            .perform(
                actor,
                "grants",
                "create",
                AuditDraft::new("create", "grant").detail(detail),
                Box::new(move |tx| {
                    let grant = tx.insert_grant(&draft)?;
                    Ok(MutationOutput::new(serde_json::to_value(&grant)?).entity(grant.id.get()))
                }),
            )
            .await?;
        decode(output.value)
    }

    /// Flip a grant's active flag without touching its assignments.
    pub async fn set_grant_active(
        &self,
        actor: &Subject,
        id: GrantId,
        active: bool,
    ) -> Result<PermissionGrant> {
        let (output, _) = self
            .perform(
                actor,
                "grants",
                "update",
                AuditDraft::new("update", "grant")
                    .entity(id.get())
                    .detail(json!({ "active": active })),
                Box::new(move |tx| {
                    let grant = tx.set_grant_active(id, active)?;
                    Ok(MutationOutput::new(serde_json::to_value(&grant)?).entity(grant.id.get()))
                }),
            )
            .await?;
        decode(output.value)
    }

    pub async fn delete_grant(&self, actor: &Subject, id: GrantId) -> Result<()> {
        self.perform(
            actor,
            "grants",
            "delete",
            AuditDraft::new("delete", "grant").entity(id.get()),
            Box::new(move |tx| {
                tx.soft_delete_grant(id)?;
                Ok(MutationOutput::new(Value::Null))
            }),
        )
        .await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Assignments
    // ─────────────────────────────────────────────────────────────────────

    /// Link a subject directly to a grant. Idempotent; the audit detail
    /// records which of the three outcomes actually happened.
    pub async fn assign_grant(
        &self,
        actor: &Subject,
        subject_id: SubjectId,
        grant_id: GrantId,
    ) -> Result<AssignOutcome> {
        let (output, _) = self
            .perform(
                actor,
                "grants",
                "assign",
                AuditDraft::new("assign", "assignment")
                    .detail(json!({ "subject_id": subject_id, "grant_id": grant_id })),
                Box::new(move |tx| {
                    let outcome = tx.assign(subject_id, grant_id)?;
                    let tag = match &outcome {
                        AssignOutcome::Created(_) => "created",
                        AssignOutcome::Reactivated(_) => "reactivated",
                        AssignOutcome::AlreadyActive(_) => "already-active",
                    };
                    let assignment = serde_json::to_value(outcome.assignment())?;
                    Ok(MutationOutput::new(json!({
                        "outcome": tag,
                        "assignment": assignment,
                    }))
                    .entity(outcome.assignment().id.get()))
                }),
            )
            .await?;

        let assignment: SubjectGrantAssignment = decode(output.value["assignment"].clone())?;
        Ok(match output.value["outcome"].as_str() {
            Some("created") => AssignOutcome::Created(assignment),
            Some("reactivated") => AssignOutcome::Reactivated(assignment),
            _ => AssignOutcome::AlreadyActive(assignment),
        })
    }

    /// Deactivate a direct link. Idempotent; returns whether an active
    /// link existed.
    pub async fn revoke_grant(
        &self,
        actor: &Subject,
        subject_id: SubjectId,
        grant_id: GrantId,
    ) -> Result<bool> {
        let (output, _) = self
            .perform(
                actor,
                "grants",
                "revoke",
                AuditDraft::new("revoke", "assignment")
                    .detail(json!({ "subject_id": subject_id, "grant_id": grant_id })),
                Box::new(move |tx| {
                    let revoked = tx.revoke(subject_id, grant_id)?;
                    Ok(MutationOutput::new(json!({ "revoked": revoked })))
                }),
            )
            .await?;
        Ok(output.value["revoked"].as_bool().unwrap_or(false))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Audit trail
    // ─────────────────────────────────────────────────────────────────────

    /// Query the audit trail. Gated on `logs:read`; the query itself is
    /// not audited.
    pub async fn audit_trail(
        &self,
        actor: &Subject,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditRecord>> {
        let (resource, action) = keys("logs", "read")?;
        self.require(actor, &resource, &action).await?;
        Ok(self.store.list_audit(filter).await?)
    }

    /// Append a standalone audit record for a non-mutating event such as
    /// a login. Not gated: recording one's own events needs no grant.
    pub async fn record_event(&self, mut draft: AuditDraft) -> Result<AuditRecord> {
        if draft.origin.is_none() {
            draft.origin = self.origin.clone();
        }
        Ok(self.store.append_audit(draft).await?)
    }
}

fn keys(resource: &str, action: &str) -> Result<(Resource, Action)> {
    Ok((Resource::new(resource)?, Action::new(action)?))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| EngineError::Store(StoreError::InvalidData(e.to_string())))
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| EngineError::Store(StoreError::InvalidData(e.to_string())))
}
