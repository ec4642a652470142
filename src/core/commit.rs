//! Three-phase commit protocol: CREATE opens a cycle, PUT_CONTENT stages
//! entities, FINALIZE merges them and prunes whatever the cycle did not touch.

use hashbrown::HashSet;

use crate::{
    record::{MirroredRecord, Record},
    types::{CommitType, EntityId},
};

/// Commit phase carried by the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitPhase {
    /// CREATE: opens a cycle.
    Create,
    /// PUT_CONTENT: stages one entity.
    PutContent,
    /// FINALIZE: merges and prunes.
    Finalize,
}

/// A commit frame addressed to one bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitEvent {
    /// Which step of the cycle this is.
    pub phase: CommitPhase,
    /// Type the cycle belongs to.
    pub commit_type: CommitType,
    /// Server-issued cycle id.
    pub commit_id: String,
    /// Only meaningful for [`CommitPhase::PutContent`].
    pub entity: Option<Record>,
}

impl CommitEvent {
    /// A `COMMIT_CREATE` event.
    pub fn create(commit_type: CommitType, commit_id: impl Into<String>) -> Self {
        Self {
            phase: CommitPhase::Create,
            commit_type,
            commit_id: commit_id.into(),
            entity: None,
        }
    }

    /// A `COMMIT_PUT_CONTENT` event carrying `entity`.
    pub fn put(commit_type: CommitType, commit_id: impl Into<String>, entity: Record) -> Self {
        Self {
            phase: CommitPhase::PutContent,
            commit_type,
            commit_id: commit_id.into(),
            entity: Some(entity),
        }
    }

    /// A `COMMIT_FINALIZE` event.
    pub fn finalize(commit_type: CommitType, commit_id: impl Into<String>) -> Self {
        Self {
            phase: CommitPhase::Finalize,
            commit_type,
            commit_id: commit_id.into(),
            entity: None,
        }
    }
}

/// Live state of one in-progress cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Type this cycle covers.
    pub commit_type: CommitType,
    /// Server-issued id.
    pub id: String,
    /// Keys staged by PUT_CONTENT during this cycle.
    pub updated_ids: HashSet<EntityId>,
}

impl Commit {
    /// Opens an empty cycle.
    pub fn new(commit_type: CommitType, id: impl Into<String>) -> Self {
        Self {
            commit_type,
            id: id.into(),
            updated_ids: HashSet::new(),
        }
    }

    /// True when `id` names this cycle.
    pub fn matches(&self, id: &str) -> bool {
        self.id == id
    }
}

/// Why a commit event was dropped. Dropping is the normal outcome after a
/// missed CREATE, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoredReason {
    /// No cycle is open for the event's type.
    NoOpenCommit,
    /// A different cycle is open for the event's type.
    StaleCommit {
        /// Id of the cycle that is open.
        open: String,
    },
    /// PUT_CONTENT without an entity.
    MissingEntity,
    /// Entity lacks the bucket's key field.
    MissingKey,
}

/// Result of applying one commit event.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// A cycle was opened; `abandoned` names the cycle it replaced.
    Opened {
        /// Id of the replaced cycle, if one was open.
        abandoned: Option<String>,
    },
    /// An entity was staged.
    Staged {
        /// Key of the staged entity.
        id: EntityId,
    },
    /// The cycle completed.
    Finalized {
        /// Pending entities merged by the forced apply.
        applied: usize,
        /// Keys touched during the cycle.
        updated: usize,
        /// Records pruned.
        removed: usize,
    },
    /// The event did not apply.
    Ignored(IgnoredReason),
}

/// Membership delta produced by any mirror mutation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MirrorChange {
    /// Records added or updated in place, as they now stand.
    pub ingested: Vec<MirroredRecord>,
    /// Records removed, as they stood before removal.
    pub removed: Vec<MirroredRecord>,
}

impl MirrorChange {
    /// True when nothing was ingested or removed.
    pub fn is_empty(&self) -> bool {
        self.ingested.is_empty() && self.removed.is_empty()
    }

    /// Appends `other` after `self`.
    pub fn extend(&mut self, other: MirrorChange) {
        self.ingested.extend(other.ingested);
        self.removed.extend(other.removed);
    }
}

/// Outcome plus the membership delta it caused.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitApplied {
    /// What the event did.
    pub outcome: CommitOutcome,
    /// Records it added, updated or removed.
    pub change: MirrorChange,
}

impl CommitApplied {
    pub(crate) fn unchanged(outcome: CommitOutcome) -> Self {
        Self {
            outcome,
            change: MirrorChange::default(),
        }
    }
}
