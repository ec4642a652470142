//! Shared primitive IDs used across the wire, core, and runtime layers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Scope (guild) identifier that owns a set of buckets.
pub type ScopeId = String;
/// Server-assigned commit type tag.
pub type CommitType = u8;
/// Zero-based bootstrap page index.
pub type PageIndex = u32;

/// Application-level unique key of a mirrored entity.
///
/// Extracted from a record field chosen per bucket; numeric keys are kept in
/// their decimal form so JSON and binary sources agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    /// Borrows the key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Routing key for commit events: one bucket per `(scope, commit_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    /// Owning scope.
    pub scope: ScopeId,
    /// Commit type the bucket answers to.
    pub commit_type: CommitType,
}

impl BucketKey {
    /// Builds a key from its parts.
    pub fn new(scope: impl Into<ScopeId>, commit_type: CommitType) -> Self {
        Self {
            scope: scope.into(),
            commit_type,
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.scope, self.commit_type)
    }
}
