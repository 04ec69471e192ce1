//! End-to-end tests of the engine over both storage backends.
//!
//! Each scenario runs against the in-memory store and against SQLite, so
//! a divergence between the backends fails loudly here.

use std::sync::Arc;

use serde_json::json;

use civica::{
    Action, AssignOutcome, AuditDraft, AuditFilter, Engine, EngineConfig, EngineError, GrantDraft,
    GrantId, GroupDraft, GroupId, MemoryStore, MutationOutput, Resource, SqliteStore, Store,
    Subject, SubjectDraft, SubjectId, SubjectPatch,
};

const ROOT: &str = "root@records.gov";
const CLERK: &str = "clerk@records.gov";

/// Actor used before any subject exists; privileged by handle.
fn bootstrap_actor() -> Subject {
    Subject {
        id: SubjectId(0),
        handle: ROOT.to_string(),
        display_name: "Root".to_string(),
        active: true,
        group_id: None,
        created_at: 0,
        updated_at: 0,
        deleted_at: None,
    }
}

struct Fixture<S> {
    engine: Arc<Engine<S>>,
    root: Subject,
    clerk: Subject,
    group: GroupId,
    /// `tickets:read`, owned by the clerk's group.
    grant: GrantId,
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

async fn fixture<S: Store + 'static>(store: Arc<S>) -> Fixture<S> {
    init_tracing();
    let engine = Arc::new(Engine::new(store, EngineConfig::with_privileged([ROOT])));

    let root = engine
        .create_subject(
            &bootstrap_actor(),
            SubjectDraft {
                handle: ROOT.to_string(),
                display_name: "Root".to_string(),
                group_id: None,
            },
        )
        .await
        .unwrap();
    let group = engine
        .create_group(
            &root,
            GroupDraft {
                name: "registry-office".to_string(),
                description: Some("civil registry".to_string()),
            },
        )
        .await
        .unwrap();
    let clerk = engine
        .create_subject(
            &root,
            SubjectDraft {
                handle: CLERK.to_string(),
                display_name: "Clerk".to_string(),
                group_id: Some(group.id),
            },
        )
        .await
        .unwrap();
    let grant = engine
        .create_grant(
            &root,
            GrantDraft {
                group_id: group.id,
                resource: Resource::new("tickets").unwrap(),
                action: Action::new("read").unwrap(),
            },
        )
        .await
        .unwrap();

    Fixture {
        engine,
        root,
        clerk,
        group: group.id,
        grant: grant.id,
    }
}

fn memory() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

fn sqlite() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open_memory().unwrap())
}

// ─────────────────────────────────────────────────────────────────────────────
// Decision semantics
// ─────────────────────────────────────────────────────────────────────────────

async fn check_bypass_needs_no_grants<S: Store + 'static>(store: Arc<S>) {
    let f = fixture(store).await;

    // No grant exists anywhere near vault:purge
    let decision = f.engine.authorize(&f.root, "vault", "purge").await.unwrap();
    assert!(decision.is_allow());
    assert_eq!(decision.reason(), "bypass");

    let decision = f.engine.authorize(&f.clerk, "vault", "purge").await.unwrap();
    assert_eq!(decision.reason(), "no-grant");
}

#[tokio::test]
async fn test_bypass_needs_no_grants() {
    check_bypass_needs_no_grants(memory()).await;
    check_bypass_needs_no_grants(sqlite()).await;
}

async fn check_direct_grant_beats_group_grant<S: Store + 'static>(store: Arc<S>) {
    let f = fixture(store).await;

    // Group membership alone resolves through the group
    let decision = f.engine.authorize(&f.clerk, "tickets", "read").await.unwrap();
    assert_eq!(decision.reason(), "group-grant");

    // A direct assignment takes precedence over the same grant
    f.engine
        .assign_grant(&f.root, f.clerk.id, f.grant)
        .await
        .unwrap();
    let decision = f.engine.authorize(&f.clerk, "tickets", "read").await.unwrap();
    assert_eq!(decision.reason(), "direct-grant");

    // Revoking the direct link falls back to the group path
    assert!(f
        .engine
        .revoke_grant(&f.root, f.clerk.id, f.grant)
        .await
        .unwrap());
    let decision = f.engine.authorize(&f.clerk, "tickets", "read").await.unwrap();
    assert_eq!(decision.reason(), "group-grant");
}

#[tokio::test]
async fn test_direct_grant_beats_group_grant() {
    check_direct_grant_beats_group_grant(memory()).await;
    check_direct_grant_beats_group_grant(sqlite()).await;
}

async fn check_dead_grants_never_authorize<S: Store + 'static>(store: Arc<S>) {
    let f = fixture(store).await;

    // Deactivated: denied, but the grant row survives
    f.engine
        .set_grant_active(&f.root, f.grant, false)
        .await
        .unwrap();
    let decision = f.engine.authorize(&f.clerk, "tickets", "read").await.unwrap();
    assert_eq!(decision.reason(), "no-grant");

    // Reactivated: allowed again
    f.engine
        .set_grant_active(&f.root, f.grant, true)
        .await
        .unwrap();
    let decision = f.engine.authorize(&f.clerk, "tickets", "read").await.unwrap();
    assert!(decision.is_allow());

    // Soft-deleted: denied, and assigning it is a NotFound
    f.engine.delete_grant(&f.root, f.grant).await.unwrap();
    let decision = f.engine.authorize(&f.clerk, "tickets", "read").await.unwrap();
    assert_eq!(decision.reason(), "no-grant");
    let err = f
        .engine
        .assign_grant(&f.root, f.clerk.id, f.grant)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn test_dead_grants_never_authorize() {
    check_dead_grants_never_authorize(memory()).await;
    check_dead_grants_never_authorize(sqlite()).await;
}

async fn check_group_delete_cascades<S: Store + 'static>(store: Arc<S>) {
    let f = fixture(store).await;

    let before = f
        .engine
        .audit_trail(&f.root, &AuditFilter::any())
        .await
        .unwrap()
        .len();

    f.engine.delete_group(&f.root, f.group).await.unwrap();

    // The group's grant died with it
    let decision = f.engine.authorize(&f.clerk, "tickets", "read").await.unwrap();
    assert_eq!(decision.reason(), "no-grant");
    assert!(f.engine.store().find_grant(f.grant).await.unwrap().is_none());

    // Exactly one new audit record; nothing about the cascaded grant
    // disappeared from the trail
    let after = f
        .engine
        .audit_trail(&f.root, &AuditFilter::any())
        .await
        .unwrap();
    assert_eq!(after.len(), before + 1);
    assert_eq!(after[0].action, "delete");
    assert_eq!(after[0].entity_type, "group");
}

#[tokio::test]
async fn test_group_delete_cascades_to_grants() {
    check_group_delete_cascades(memory()).await;
    check_group_delete_cascades(sqlite()).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Enforcement and audit coupling
// ─────────────────────────────────────────────────────────────────────────────

async fn check_denied_request_leaves_no_trace<S: Store + 'static>(store: Arc<S>) {
    let f = fixture(store).await;

    let before = f
        .engine
        .audit_trail(&f.root, &AuditFilter::any())
        .await
        .unwrap()
        .len();

    let err = f
        .engine
        .create_group(
            &f.clerk,
            GroupDraft {
                name: "rogue-office".to_string(),
                description: None,
            },
        )
        .await
        .unwrap_err();
    match err {
        EngineError::Denied {
            handle, reason, ..
        } => {
            assert_eq!(handle, CLERK);
            assert_eq!(reason, "no-grant");
        }
        other => panic!("expected Denied, got {other:?}"),
    }

    let after = f
        .engine
        .audit_trail(&f.root, &AuditFilter::any())
        .await
        .unwrap()
        .len();
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_denied_request_leaves_no_trace() {
    check_denied_request_leaves_no_trace(memory()).await;
    check_denied_request_leaves_no_trace(sqlite()).await;
}

async fn check_every_mutation_is_audited<S: Store + 'static>(store: Arc<S>) {
    let f = fixture(store).await;

    f.engine
        .assign_grant(&f.root, f.clerk.id, f.grant)
        .await
        .unwrap();
    f.engine
        .update_subject(
            &f.root,
            f.clerk.id,
            SubjectPatch {
                display_name: Some("Head Clerk".to_string()),
                ..SubjectPatch::default()
            },
        )
        .await
        .unwrap();

    let trail = f
        .engine
        .audit_trail(&f.root, &AuditFilter::any().for_subject(f.root.id))
        .await
        .unwrap();

    // create group, create clerk, create grant, assign, update — every
    // one attributed to root, newest first
    let actions: Vec<&str> = trail.iter().map(|r| r.action.as_str()).collect();
    assert_eq!(actions, ["update", "assign", "create", "create", "create"]);
    assert!(trail.iter().all(|r| r.subject_id == Some(f.root.id)));
}

#[tokio::test]
async fn test_every_mutation_is_audited() {
    check_every_mutation_is_audited(memory()).await;
    check_every_mutation_is_audited(sqlite()).await;
}

async fn check_mutation_failure_writes_nothing<S: Store + 'static>(store: Arc<S>) {
    let f = fixture(store).await;

    let err = f
        .engine
        .perform(
            &f.root,
            "cemeteries",
            "create",
            AuditDraft::new("create", "cemetery"),
            Box::new(|tx| {
                tx.insert_document("cemetery", &json!({"name": "north"}))?;
                anyhow::bail!("plot count out of range");
            }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Mutation(_)));

    let trail = f
        .engine
        .audit_trail(&f.root, &AuditFilter::any().for_entity_type("cemetery"))
        .await
        .unwrap();
    assert!(trail.is_empty());
}

#[tokio::test]
async fn test_mutation_failure_writes_nothing() {
    check_mutation_failure_writes_nothing(memory()).await;
    check_mutation_failure_writes_nothing(sqlite()).await;
}

#[tokio::test]
async fn test_audit_failure_rolls_back_mutation() {
    let store = memory();
    let f = fixture(Arc::clone(&store)).await;

    store.fail_next_audit_append();
    let err = f
        .engine
        .perform(
            &f.root,
            "cemeteries",
            "create",
            AuditDraft::new("create", "cemetery"),
            Box::new(|tx| {
                let doc = tx.insert_document("cemetery", &json!({"name": "north"}))?;
                Ok(MutationOutput::new(doc.data.clone()).entity(doc.id.get()))
            }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Recording(_)));

    // Neither side of the pair is observable afterwards
    let trail = f
        .engine
        .audit_trail(&f.root, &AuditFilter::any().for_entity_type("cemetery"))
        .await
        .unwrap();
    assert!(trail.is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Assignment idempotency
// ─────────────────────────────────────────────────────────────────────────────

async fn check_assign_and_revoke_idempotent<S: Store + 'static>(store: Arc<S>) {
    let f = fixture(store).await;

    assert!(matches!(
        f.engine
            .assign_grant(&f.root, f.clerk.id, f.grant)
            .await
            .unwrap(),
        AssignOutcome::Created(_)
    ));
    assert!(matches!(
        f.engine
            .assign_grant(&f.root, f.clerk.id, f.grant)
            .await
            .unwrap(),
        AssignOutcome::AlreadyActive(_)
    ));

    assert!(f
        .engine
        .revoke_grant(&f.root, f.clerk.id, f.grant)
        .await
        .unwrap());
    assert!(!f
        .engine
        .revoke_grant(&f.root, f.clerk.id, f.grant)
        .await
        .unwrap());

    assert!(matches!(
        f.engine
            .assign_grant(&f.root, f.clerk.id, f.grant)
            .await
            .unwrap(),
        AssignOutcome::Reactivated(_)
    ));

    let rows = f.engine.store().list_assignments(f.clerk.id).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_assign_and_revoke_idempotent() {
    check_assign_and_revoke_idempotent(memory()).await;
    check_assign_and_revoke_idempotent(sqlite()).await;
}

async fn check_concurrent_assign_single_row<S: Store + 'static>(store: Arc<S>) {
    let f = fixture(store).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&f.engine);
        let root = f.root.clone();
        let (subject_id, grant_id) = (f.clerk.id, f.grant);
        tasks.push(tokio::spawn(async move {
            engine.assign_grant(&root, subject_id, grant_id).await
        }));
    }

    let mut created = 0;
    for task in tasks {
        match task.await.unwrap().unwrap() {
            AssignOutcome::Created(_) => created += 1,
            AssignOutcome::AlreadyActive(_) | AssignOutcome::Reactivated(_) => {}
        }
    }
    assert_eq!(created, 1);

    let rows = f.engine.store().list_assignments(f.clerk.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].active);
}

#[tokio::test]
async fn test_concurrent_assign_single_row() {
    check_concurrent_assign_single_row(memory()).await;
    check_concurrent_assign_single_row(sqlite()).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Soft delete
// ─────────────────────────────────────────────────────────────────────────────

async fn check_deleted_subject_keeps_its_trail<S: Store + 'static>(store: Arc<S>) {
    let f = fixture(store).await;

    f.engine
        .assign_grant(&f.root, f.clerk.id, f.grant)
        .await
        .unwrap();
    f.engine.delete_subject(&f.root, f.clerk.id).await.unwrap();

    // The subject reads as absent
    assert!(f
        .engine
        .store()
        .find_subject_by_handle(CLERK)
        .await
        .unwrap()
        .is_none());

    // Records referencing it are untouched
    let trail = f
        .engine
        .audit_trail(&f.root, &AuditFilter::any())
        .await
        .unwrap();
    assert!(trail
        .iter()
        .any(|r| r.entity_type == "subject" && r.entity_id == Some(f.clerk.id.get())));
}

#[tokio::test]
async fn test_deleted_subject_keeps_its_trail() {
    check_deleted_subject_keeps_its_trail(memory()).await;
    check_deleted_subject_keeps_its_trail(sqlite()).await;
}

async fn check_audit_trail_gating_and_paging<S: Store + 'static>(store: Arc<S>) {
    let f = fixture(store).await;

    // The clerk has no logs:read grant
    let err = f
        .engine
        .audit_trail(&f.clerk, &AuditFilter::any())
        .await
        .unwrap_err();
    assert!(err.is_denied());

    // Granting logs:read to the group opens the trail
    let logs_grant = f
        .engine
        .create_grant(
            &f.root,
            GrantDraft {
                group_id: f.group,
                resource: Resource::new("logs").unwrap(),
                action: Action::new("read").unwrap(),
            },
        )
        .await
        .unwrap();

    let filter = AuditFilter {
        limit: Some(2),
        ..AuditFilter::any()
    };
    let page = f.engine.audit_trail(&f.clerk, &filter).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].entity_id, Some(logs_grant.id.get()));
}

#[tokio::test]
async fn test_audit_trail_gating_and_paging() {
    check_audit_trail_gating_and_paging(memory()).await;
    check_audit_trail_gating_and_paging(sqlite()).await;
}

#[tokio::test]
async fn test_engine_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("access.db");

    let clerk_id = {
        let f = fixture(Arc::new(SqliteStore::open(&path).unwrap())).await;
        f.engine
            .assign_grant(&f.root, f.clerk.id, f.grant)
            .await
            .unwrap();
        f.clerk.id
    };

    let engine = Engine::new(
        Arc::new(SqliteStore::open(&path).unwrap()),
        EngineConfig::with_privileged([ROOT]),
    );
    let clerk = engine.store().find_subject(clerk_id).await.unwrap().unwrap();
    let decision = engine.authorize(&clerk, "tickets", "read").await.unwrap();
    assert_eq!(decision.reason(), "direct-grant");
}
