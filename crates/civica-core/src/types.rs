//! Strong type definitions for the access engine.
//!
//! All identifiers are newtypes over the store's rowid type to prevent
//! misuse at compile time (a `SubjectId` is never accepted where a
//! `GrantId` is required).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Identifier of a [`crate::Subject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub i64);

/// Identifier of a [`crate::Group`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub i64);

/// Identifier of a [`crate::PermissionGrant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrantId(pub i64);

/// Identifier of a [`crate::SubjectGrantAssignment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssignmentId(pub i64);

/// Identifier of an [`crate::AuditRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditId(pub i64);

/// Identifier of a business [`crate::Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub i64);

macro_rules! impl_id_conversions {
    ($($id:ident),* $(,)?) => {
        $(
            impl $id {
                /// The raw rowid value.
                pub const fn get(self) -> i64 {
                    self.0
                }
            }

            impl From<i64> for $id {
                fn from(raw: i64) -> Self {
                    Self(raw)
                }
            }

            impl fmt::Display for $id {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )*
    };
}

impl_id_conversions!(SubjectId, GroupId, GrantId, AssignmentId, AuditId, DocumentId);

/// A protected resource name, e.g. `"cemeteries"` or `"logs"`.
///
/// Resource names are caller-defined but must be non-empty and free of
/// surrounding whitespace; grants are matched by exact string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(String);

/// An action verb on a resource, e.g. `"read"` or `"update"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(String);

impl Resource {
    /// Create a resource name, rejecting empty or padded input.
    pub fn new(name: impl Into<String>) -> Result<Self, CoreError> {
        let name = name.into();
        if name.is_empty() || name.trim() != name {
            return Err(CoreError::InvalidResource(name));
        }
        Ok(Self(name))
    }

    /// The resource name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Action {
    /// Create an action verb, rejecting empty or padded input.
    pub fn new(verb: impl Into<String>) -> Result<Self, CoreError> {
        let verb = verb.into();
        if verb.is_empty() || verb.trim() != verb {
            return Err(CoreError::InvalidAction(verb));
        }
        Ok(Self(verb))
    }

    /// The action verb as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Resource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl std::str::FromStr for Action {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
