//! Privileged-subject predicates.
//!
//! Whether a subject bypasses grant resolution entirely is a deployment
//! decision, so it is injected as a predicate rather than hard-coded. The
//! common case is a configured set of handles.

use std::collections::HashSet;

use civica_core::Subject;

/// Decides whether a subject is privileged.
///
/// A privileged subject is allowed every operation without touching the
/// grant tables. Implementations must be cheap and infallible; anything
/// that needs I/O belongs in the store, not here.
pub trait PrivilegedPredicate: Send + Sync {
    fn is_privileged(&self, subject: &Subject) -> bool;
}

impl<F> PrivilegedPredicate for F
where
    F: Fn(&Subject) -> bool + Send + Sync,
{
    fn is_privileged(&self, subject: &Subject) -> bool {
        self(subject)
    }
}

/// A configured set of privileged handles.
#[derive(Debug, Clone, Default)]
pub struct PrivilegedHandles {
    handles: HashSet<String>,
}

impl PrivilegedHandles {
    /// An empty set: nobody bypasses resolution.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(handles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            handles: handles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.handles.contains(handle)
    }
}

impl PrivilegedPredicate for PrivilegedHandles {
    fn is_privileged(&self, subject: &Subject) -> bool {
        self.handles.contains(&subject.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civica_core::SubjectId;

    fn subject(handle: &str) -> Subject {
        Subject {
            id: SubjectId(1),
            handle: handle.to_string(),
            display_name: "Test".to_string(),
            active: true,
            group_id: None,
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
        }
    }

    #[test]
    fn test_handle_set_matches_exactly() {
        let privileged = PrivilegedHandles::new(["root@records.gov"]);
        assert!(privileged.is_privileged(&subject("root@records.gov")));
        assert!(!privileged.is_privileged(&subject("clerk@records.gov")));
        assert!(!privileged.is_privileged(&subject("ROOT@records.gov")));
    }

    #[test]
    fn test_empty_set_matches_nobody() {
        let privileged = PrivilegedHandles::none();
        assert!(!privileged.is_privileged(&subject("root@records.gov")));
    }

    #[test]
    fn test_closure_predicate() {
        let privileged = |s: &Subject| s.handle.ends_with("@ops.gov");
        assert!(privileged.is_privileged(&subject("oncall@ops.gov")));
        assert!(!privileged.is_privileged(&subject("clerk@records.gov")));
    }
}
