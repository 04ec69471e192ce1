//! Engine configuration.

use serde::{Deserialize, Serialize};

use civica_authz::PrivilegedHandles;

/// Deployment-level configuration for the access engine.
///
/// Loadable from any serde source; everything has a safe default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Handles that bypass grant resolution entirely. Empty by default:
    /// privilege is always explicit configuration, never a built-in
    /// account.
    pub privileged_handles: Vec<String>,

    /// Origin tag stamped onto audit records the engine creates on its
    /// own behalf (e.g. system events without a request context).
    pub origin: Option<String>,
}

impl EngineConfig {
    pub fn with_privileged(handles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            privileged_handles: handles.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub(crate) fn privileged(&self) -> PrivilegedHandles {
        PrivilegedHandles::new(self.privileged_handles.iter().cloned())
    }
}
