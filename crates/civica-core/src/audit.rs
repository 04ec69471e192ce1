//! Audit records: the immutable trail of completed, authorized mutations.
//!
//! Records are append-only. They are never updated, never deleted, and
//! never cascaded when the entities they reference are soft-deleted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{AuditId, SubjectId};

/// One immutable audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditId,
    /// `None` for unauthenticated system actions.
    pub subject_id: Option<SubjectId>,
    /// Action verb: `"create"`, `"update"`, `"delete"`, `"login"`, ...
    pub action: String,
    /// Entity type the action applied to: `"grant"`, `"cemetery"`, ...
    pub entity_type: String,
    /// Raw id of the affected entity, namespaced by `entity_type`.
    pub entity_id: Option<i64>,
    /// Structured detail payload, e.g. the request body that was applied.
    pub detail: Value,
    /// Origin address of the request, when known.
    pub origin: Option<String>,
    /// Server-assigned creation timestamp (Unix ms).
    pub created_at: i64,
}

/// A record waiting to be appended; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditDraft {
    pub subject_id: Option<SubjectId>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub detail: Value,
    pub origin: Option<String>,
}

impl AuditDraft {
    /// Start a draft for the given action verb and entity type.
    pub fn new(action: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            subject_id: None,
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: None,
            detail: Value::Null,
            origin: None,
        }
    }

    /// Attribute the record to a subject.
    pub fn by(mut self, subject_id: SubjectId) -> Self {
        self.subject_id = Some(subject_id);
        self
    }

    /// Reference the affected entity.
    pub fn entity(mut self, entity_id: i64) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    /// Attach a structured detail payload.
    pub fn detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }

    /// Record the request's origin address.
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// Filter for the audit query surface.
///
/// All criteria are conjunctive; `None` means "no restriction". Results
/// are always returned newest-first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub subject_id: Option<SubjectId>,
    pub entity_type: Option<String>,
    pub action: Option<String>,
    /// Inclusive lower bound on `created_at` (Unix ms).
    pub since: Option<i64>,
    /// Inclusive upper bound on `created_at` (Unix ms).
    pub until: Option<i64>,
    /// Maximum number of records to return; the store's default applies
    /// when unset.
    pub limit: Option<u32>,
    /// Number of records to skip, for paging.
    pub offset: Option<u32>,
}

impl AuditFilter {
    /// A filter matching everything (up to the store's default limit).
    pub fn any() -> Self {
        Self::default()
    }

    /// Restrict to records attributed to one subject.
    pub fn for_subject(mut self, subject_id: SubjectId) -> Self {
        self.subject_id = Some(subject_id);
        self
    }

    /// Restrict to one entity type.
    pub fn for_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Restrict to one action verb.
    pub fn for_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Restrict to records created within `[since, until]`.
    pub fn between(mut self, since: i64, until: i64) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    /// Whether a record matches every set criterion (bounds included,
    /// paging excluded).
    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(subject_id) = self.subject_id {
            if record.subject_id != Some(subject_id) {
                return false;
            }
        }
        if let Some(entity_type) = &self.entity_type {
            if &record.entity_type != entity_type {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if &record.action != action {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.created_at > until {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(subject: Option<i64>, action: &str, entity_type: &str, at: i64) -> AuditRecord {
        AuditRecord {
            id: AuditId(1),
            subject_id: subject.map(SubjectId),
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: Some(7),
            detail: json!({"field": "value"}),
            origin: Some("10.0.0.1".to_string()),
            created_at: at,
        }
    }

    #[test]
    fn test_draft_builder() {
        let draft = AuditDraft::new("create", "grant")
            .by(SubjectId(3))
            .entity(9)
            .detail(json!({"resource": "tickets"}))
            .origin("10.0.0.9");

        assert_eq!(draft.subject_id, Some(SubjectId(3)));
        assert_eq!(draft.entity_id, Some(9));
        assert_eq!(draft.action, "create");
        assert_eq!(draft.origin.as_deref(), Some("10.0.0.9"));
    }

    #[test]
    fn test_filter_conjunction() {
        let filter = AuditFilter::any()
            .for_subject(SubjectId(3))
            .for_action("update");

        assert!(filter.matches(&record(Some(3), "update", "ticket", 100)));
        assert!(!filter.matches(&record(Some(4), "update", "ticket", 100)));
        assert!(!filter.matches(&record(Some(3), "create", "ticket", 100)));
        assert!(!filter.matches(&record(None, "update", "ticket", 100)));
    }

    #[test]
    fn test_filter_time_bounds_inclusive() {
        let filter = AuditFilter::any().between(100, 200);

        assert!(filter.matches(&record(None, "login", "session", 100)));
        assert!(filter.matches(&record(None, "login", "session", 200)));
        assert!(!filter.matches(&record(None, "login", "session", 99)));
        assert!(!filter.matches(&record(None, "login", "session", 201)));
    }
}
