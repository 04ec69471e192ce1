//! The authorization resolver.
//!
//! Resolution order is fixed: privileged bypass, then a live direct
//! grant, then a live grant owned by the subject's group, then deny.
//! The bypass check runs before any store access, so a privileged
//! subject is allowed even when the grant store is unavailable.

use std::sync::Arc;

use tracing::debug;

use civica_core::{Action, AllowReason, Decision, DenyReason, Resource, Subject};
use civica_store::{GrantSource, Store};

use crate::error::{AuthzError, Result};
use crate::privileged::PrivilegedPredicate;

/// The pure decision rule, separated from storage so it can be tested
/// exhaustively.
pub fn evaluate(privileged: bool, effective: Option<&GrantSource>) -> Decision {
    if privileged {
        return Decision::Allow(AllowReason::Bypass);
    }
    match effective {
        Some(GrantSource::Direct(_)) => Decision::Allow(AllowReason::DirectGrant),
        Some(GrantSource::Group(_)) => Decision::Allow(AllowReason::GroupGrant),
        None => Decision::Deny(DenyReason::NoGrant),
    }
}

/// Resolves access decisions against a grant store.
pub struct Resolver<S> {
    store: Arc<S>,
    privileged: Arc<dyn PrivilegedPredicate>,
}

impl<S> Clone for Resolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            privileged: Arc::clone(&self.privileged),
        }
    }
}

impl<S: Store> Resolver<S> {
    pub fn new(store: Arc<S>, privileged: Arc<dyn PrivilegedPredicate>) -> Self {
        Self { store, privileged }
    }

    /// Decide whether `subject` may perform `action` on `resource`.
    ///
    /// Read-only: resolution never mutates state and leaves no audit
    /// trace of its own.
    pub async fn decide(
        &self,
        subject: &Subject,
        resource: &Resource,
        action: &Action,
    ) -> Result<Decision> {
        let decision = if self.privileged.is_privileged(subject) {
            evaluate(true, None)
        } else {
            let effective = self
                .store
                .find_effective_grant(subject, resource, action)
                .await?;
            evaluate(false, effective.as_ref())
        };

        debug!(
            subject = %subject.id,
            handle = %subject.handle,
            resource = %resource,
            action = %action,
            allow = decision.is_allow(),
            reason = decision.reason(),
            "access decision"
        );
        Ok(decision)
    }

    /// Decide for a subject referenced by handle.
    ///
    /// An absent or soft-deleted subject is an [`AuthzError::UnknownSubject`]
    /// error, not a deny: the caller must not leak which of the two it was
    /// to the requester.
    pub async fn decide_handle(
        &self,
        handle: &str,
        resource: &Resource,
        action: &Action,
    ) -> Result<Decision> {
        let subject = self
            .store
            .find_subject_by_handle(handle)
            .await?
            .ok_or_else(|| AuthzError::UnknownSubject(handle.to_string()))?;
        self.decide(&subject, resource, action).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civica_core::{
        AuditDraft, GrantDraft, GrantId, GroupDraft, GroupId, PermissionGrant, SubjectDraft,
        SubjectId,
    };
    use civica_store::{MemoryStore, MutationOutput};
    use proptest::prelude::*;

    use crate::privileged::PrivilegedHandles;

    fn grant() -> PermissionGrant {
        PermissionGrant {
            id: GrantId(1),
            group_id: GroupId(1),
            resource: Resource::new("tickets").unwrap(),
            action: Action::new("read").unwrap(),
            active: true,
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
        }
    }

    #[test]
    fn test_evaluate_reasons() {
        assert_eq!(evaluate(true, None).reason(), "bypass");
        assert_eq!(
            evaluate(false, Some(&GrantSource::Direct(grant()))).reason(),
            "direct-grant"
        );
        assert_eq!(
            evaluate(false, Some(&GrantSource::Group(grant()))).reason(),
            "group-grant"
        );
        assert_eq!(evaluate(false, None).reason(), "no-grant");
        assert!(!evaluate(false, None).is_allow());
    }

    proptest! {
        // Bypass wins regardless of what the grant lookup would have said
        #[test]
        fn prop_bypass_dominates(source in prop_oneof![
            Just(None),
            Just(Some(GrantSource::Direct(grant()))),
            Just(Some(GrantSource::Group(grant()))),
        ]) {
            let decision = evaluate(true, source.as_ref());
            prop_assert_eq!(decision.reason(), "bypass");
            prop_assert!(decision.is_allow());
        }

        // Without bypass, allow exactly when some grant is effective
        #[test]
        fn prop_allow_iff_effective(source in prop_oneof![
            Just(None),
            Just(Some(GrantSource::Direct(grant()))),
            Just(Some(GrantSource::Group(grant()))),
        ]) {
            let decision = evaluate(false, source.as_ref());
            prop_assert_eq!(decision.is_allow(), source.is_some());
        }
    }

    async fn seeded_store() -> (Arc<MemoryStore>, Subject, GrantId) {
        let store = Arc::new(MemoryStore::new());
        let (output, _) = store
            .mutate_with_audit(
                AuditDraft::new("seed", "fixture"),
                Box::new(|tx| {
                    let group = tx.insert_group(&GroupDraft {
                        name: "registry-office".to_string(),
                        description: None,
                    })?;
                    let subject = tx.insert_subject(&SubjectDraft {
                        handle: "clerk@records.gov".to_string(),
                        display_name: "Clerk".to_string(),
                        group_id: Some(group.id),
                    })?;
                    let grant = tx.insert_grant(&GrantDraft {
                        group_id: group.id,
                        resource: Resource::new("tickets").unwrap(),
                        action: Action::new("read").unwrap(),
                    })?;
                    Ok(MutationOutput::new(serde_json::json!({
                        "subject": subject.id,
                        "grant": grant.id,
                    })))
                }),
            )
            .await
            .unwrap();

        let subject_id = SubjectId(output.value["subject"].as_i64().unwrap());
        let grant_id = GrantId(output.value["grant"].as_i64().unwrap());
        let subject = store.find_subject(subject_id).await.unwrap().unwrap();
        (store, subject, grant_id)
    }

    #[tokio::test]
    async fn test_decide_group_then_direct() {
        let (store, subject, grant_id) = seeded_store().await;
        let resolver = Resolver::new(
            Arc::clone(&store),
            Arc::new(PrivilegedHandles::none()),
        );

        let tickets = Resource::new("tickets").unwrap();
        let read = Action::new("read").unwrap();
        let write = Action::new("write").unwrap();

        let decision = resolver.decide(&subject, &tickets, &read).await.unwrap();
        assert_eq!(decision.reason(), "group-grant");

        store.assign(subject.id, grant_id).await.unwrap();
        let decision = resolver.decide(&subject, &tickets, &read).await.unwrap();
        assert_eq!(decision.reason(), "direct-grant");

        let decision = resolver.decide(&subject, &tickets, &write).await.unwrap();
        assert_eq!(decision.reason(), "no-grant");
    }

    #[tokio::test]
    async fn test_privileged_bypass_skips_grants() {
        let (store, subject, _) = seeded_store().await;
        let resolver = Resolver::new(
            store,
            Arc::new(PrivilegedHandles::new(["clerk@records.gov"])),
        );

        // No grant exists for this pair, yet the decision is allow
        let vault = Resource::new("vault").unwrap();
        let purge = Action::new("purge").unwrap();
        let decision = resolver.decide(&subject, &vault, &purge).await.unwrap();
        assert_eq!(decision.reason(), "bypass");
    }

    #[tokio::test]
    async fn test_decide_handle_unknown_subject() {
        let (store, _, _) = seeded_store().await;
        let resolver = Resolver::new(store, Arc::new(PrivilegedHandles::none()));

        let tickets = Resource::new("tickets").unwrap();
        let read = Action::new("read").unwrap();
        let err = resolver
            .decide_handle("ghost@records.gov", &tickets, &read)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::UnknownSubject(_)));

        let decision = resolver
            .decide_handle("clerk@records.gov", &tickets, &read)
            .await
            .unwrap();
        assert!(decision.is_allow());
    }
}
