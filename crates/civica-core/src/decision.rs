//! Authorization decisions.
//!
//! A decision is data, not an error: the resolver always answers, and the
//! caller chooses how to surface a deny. Reasons are part of the contract
//! so that denials are explainable and auditable.

use serde::{Deserialize, Serialize};

/// Why a request was allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllowReason {
    /// The subject matched the configured privileged-subject predicate.
    Bypass,
    /// A live direct assignment to a matching live grant.
    DirectGrant,
    /// A live grant owned by the subject's group.
    GroupGrant,
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DenyReason {
    /// No live direct or group grant covers the (resource, action) pair.
    NoGrant,
}

/// The outcome of one authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "outcome", content = "reason")]
pub enum Decision {
    Allow(AllowReason),
    Deny(DenyReason),
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }

    /// Stable reason label: `"bypass"`, `"direct-grant"`, `"group-grant"`,
    /// or `"no-grant"`.
    pub fn reason(&self) -> &'static str {
        match self {
            Decision::Allow(AllowReason::Bypass) => "bypass",
            Decision::Allow(AllowReason::DirectGrant) => "direct-grant",
            Decision::Allow(AllowReason::GroupGrant) => "group-grant",
            Decision::Deny(DenyReason::NoGrant) => "no-grant",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_labels() {
        assert_eq!(Decision::Allow(AllowReason::Bypass).reason(), "bypass");
        assert_eq!(Decision::Allow(AllowReason::DirectGrant).reason(), "direct-grant");
        assert_eq!(Decision::Allow(AllowReason::GroupGrant).reason(), "group-grant");
        assert_eq!(Decision::Deny(DenyReason::NoGrant).reason(), "no-grant");
    }

    #[test]
    fn test_is_allow() {
        assert!(Decision::Allow(AllowReason::GroupGrant).is_allow());
        assert!(!Decision::Deny(DenyReason::NoGrant).is_allow());
    }
}
