//! Proptest strategies for the engine's value types.

use proptest::prelude::*;
use serde_json::json;

use civica_core::{Action, AuditDraft, GroupId, Resource, SubjectDraft, SubjectId};

/// A valid resource name: lowercase, no padding.
pub fn resource_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{2,15}"
}

/// A valid action verb.
pub fn action_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("read".to_string()),
        Just("create".to_string()),
        Just("update".to_string()),
        Just("delete".to_string()),
        "[a-z]{3,10}",
    ]
}

pub fn resource() -> impl Strategy<Value = Resource> {
    resource_name().prop_map(|name| Resource::new(name).expect("generated resource is valid"))
}

pub fn action() -> impl Strategy<Value = Action> {
    action_name().prop_map(|name| Action::new(name).expect("generated action is valid"))
}

/// A subject draft with a unique-ish handle, optionally in a group.
pub fn subject_draft(group: Option<GroupId>) -> impl Strategy<Value = SubjectDraft> {
    ("[a-z]{4,10}", 0u32..u32::MAX).prop_map(move |(name, n)| SubjectDraft {
        handle: format!("{name}-{n:08x}@civica.test"),
        display_name: name,
        group_id: group,
    })
}

/// An audit draft for an arbitrary event.
pub fn audit_draft() -> impl Strategy<Value = AuditDraft> {
    (
        action_name(),
        resource_name(),
        proptest::option::of(1i64..1_000_000),
        proptest::option::of(1i64..1_000_000),
    )
        .prop_map(|(action, entity_type, subject_id, entity_id)| {
            let mut draft = AuditDraft::new(action, entity_type)
                .detail(json!({ "generated": true }));
            if let Some(subject_id) = subject_id {
                draft = draft.by(SubjectId(subject_id));
            }
            if let Some(entity_id) = entity_id {
                draft = draft.entity(entity_id);
            }
            draft
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn prop_generated_names_are_valid(name in resource_name(), verb in action_name()) {
            prop_assert!(Resource::new(name).is_ok());
            prop_assert!(Action::new(verb).is_ok());
        }

        #[test]
        fn prop_subject_drafts_have_distinct_handles(
            a in subject_draft(None),
            b in subject_draft(None),
        ) {
            // Collisions require both the name and the nonce to match
            prop_assume!(a.display_name != b.display_name);
            prop_assert_ne!(a.handle, b.handle);
        }

        #[test]
        fn prop_audit_drafts_round_trip(draft in audit_draft()) {
            let encoded = serde_json::to_string(&draft).unwrap();
            let decoded: AuditDraft = serde_json::from_str(&encoded).unwrap();
            prop_assert_eq!(draft, decoded);
        }
    }
}
