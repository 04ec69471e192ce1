//! Seeded engine fixtures for tests.
//!
//! A [`SeededWorld`] is the smallest population that exercises every
//! resolution path: a privileged root, a group with one grant, a clerk in
//! that group, and an auditor who can read the trail.

use std::sync::Arc;

use rand::Rng;

use civica::{Engine, EngineConfig, MemoryStore, SqliteStore, Store};
use civica_core::{
    Action, GrantDraft, GroupDraft, PermissionGrant, Resource, Subject, SubjectDraft, SubjectId,
};

/// The privileged handle every fixture engine is configured with.
pub const ROOT_HANDLE: &str = "root@civica.test";

/// Engine configuration used by the fixtures: one privileged handle, a
/// fixed origin tag.
pub fn config() -> EngineConfig {
    EngineConfig {
        privileged_handles: vec![ROOT_HANDLE.to_string()],
        origin: Some("testkit".to_string()),
    }
}

/// A synthetic actor for bootstrap calls, before any subject row exists.
/// Privileged by handle, so the resolver never looks it up.
pub fn bootstrap_actor() -> Subject {
    Subject {
        id: SubjectId(0),
        handle: ROOT_HANDLE.to_string(),
        display_name: "Bootstrap".to_string(),
        active: true,
        group_id: None,
        created_at: 0,
        updated_at: 0,
        deleted_at: None,
    }
}

/// A handle that won't collide across fixture invocations.
pub fn unique_handle(prefix: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("{prefix}-{suffix:08x}@civica.test")
}

/// An engine over a fresh in-memory map store.
pub fn memory_engine() -> Engine<MemoryStore> {
    Engine::new(Arc::new(MemoryStore::new()), config())
}

/// An engine over a fresh in-memory SQLite database.
pub fn sqlite_engine() -> Engine<SqliteStore> {
    let store = SqliteStore::open_memory().expect("open in-memory sqlite");
    Engine::new(Arc::new(store), config())
}

/// The standard seeded population.
pub struct SeededWorld {
    /// Privileged; bypasses resolution.
    pub root: Subject,
    /// Member of `group`; reaches `read_tickets` through it.
    pub clerk: Subject,
    /// Member of `group`, plus a direct assignment of `read_logs`.
    pub auditor: Subject,
    /// `tickets:read`, owned by the group.
    pub read_tickets: PermissionGrant,
    /// `logs:read`, owned by the group but only directly assigned.
    pub read_logs: PermissionGrant,
}

/// Populate an engine with the standard world.
///
/// Both grants are live and group-owned; `read_logs` is additionally
/// assigned directly to the auditor, so the auditor resolves it through
/// the direct path while the clerk resolves it through the group.
pub async fn seed<S: Store>(engine: &Engine<S>) -> SeededWorld {
    let boot = bootstrap_actor();
    let root = engine
        .create_subject(
            &boot,
            SubjectDraft {
                handle: ROOT_HANDLE.to_string(),
                display_name: "Root".to_string(),
                group_id: None,
            },
        )
        .await
        .expect("seed root");

    let group = engine
        .create_group(
            &root,
            GroupDraft {
                name: "registry-office".to_string(),
                description: Some("civil registry".to_string()),
            },
        )
        .await
        .expect("seed group");

    let clerk = engine
        .create_subject(
            &root,
            SubjectDraft {
                handle: unique_handle("clerk"),
                display_name: "Clerk".to_string(),
                group_id: Some(group.id),
            },
        )
        .await
        .expect("seed clerk");
    let auditor = engine
        .create_subject(
            &root,
            SubjectDraft {
                handle: unique_handle("auditor"),
                display_name: "Auditor".to_string(),
                group_id: Some(group.id),
            },
        )
        .await
        .expect("seed auditor");

    let read_tickets = engine
        .create_grant(
            &root,
            GrantDraft {
                group_id: group.id,
                resource: Resource::new("tickets").expect("resource"),
                action: Action::new("read").expect("action"),
            },
        )
        .await
        .expect("seed tickets grant");
    let read_logs = engine
        .create_grant(
            &root,
            GrantDraft {
                group_id: group.id,
                resource: Resource::new("logs").expect("resource"),
                action: Action::new("read").expect("action"),
            },
        )
        .await
        .expect("seed logs grant");

    engine
        .assign_grant(&root, auditor.id, read_logs.id)
        .await
        .expect("assign logs grant");

    SeededWorld {
        root,
        clerk,
        auditor,
        read_tickets,
        read_logs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeded_world_resolution_paths() {
        let engine = memory_engine();
        let world = seed(&engine).await;

        let decision = engine.authorize(&world.root, "vault", "purge").await.unwrap();
        assert_eq!(decision.reason(), "bypass");

        let decision = engine
            .authorize(&world.clerk, "tickets", "read")
            .await
            .unwrap();
        assert_eq!(decision.reason(), "group-grant");

        let decision = engine
            .authorize(&world.auditor, "logs", "read")
            .await
            .unwrap();
        assert_eq!(decision.reason(), "direct-grant");

        let decision = engine
            .authorize(&world.clerk, "tickets", "delete")
            .await
            .unwrap();
        assert_eq!(decision.reason(), "no-grant");
    }

    #[tokio::test]
    async fn test_seed_works_on_sqlite() {
        let engine = sqlite_engine();
        let world = seed(&engine).await;
        assert!(engine
            .store()
            .find_subject(world.clerk.id)
            .await
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_unique_handles_differ() {
        assert_ne!(unique_handle("clerk"), unique_handle("clerk"));
    }
}
