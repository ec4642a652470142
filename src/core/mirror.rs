use hashbrown::{HashMap, HashSet, hash_map::Entry};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    record::{CommitTag, MirroredRecord, Record, Value},
    types::{CommitType, EntityId},
};

use super::{
    bucket::BucketSpec,
    commit::{
        Commit, CommitApplied, CommitEvent, CommitOutcome, CommitPhase, IgnoredReason,
        MirrorChange,
    },
};

/// UUID bookkeeping diverged from the mirrored content. Always a bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyError {
    /// A prune target is not in `content`.
    #[error("failed to prune {id}: not present in content")]
    MissingFromContent {
        /// The missing key.
        id: EntityId,
    },
}

/// Mirror mutation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MirrorError {
    /// Bookkeeping diverged; see [`ConsistencyError`].
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
    /// A bootstrap record lacked the key field; the page was rejected whole.
    #[error("record {index} of page has no usable {field:?} key")]
    MissingKey {
        /// Position of the record in its page.
        index: usize,
        /// Key field the bucket expects.
        field: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct PendingEntity {
    id: EntityId,
    fields: Record,
    commit: CommitTag,
}

/// One mirrored collection.
///
/// `order` and `records` always hold the same key set; `order` keeps first
/// insertion order, which consumers rely on.
#[derive(Debug)]
pub struct BucketMirror {
    spec: BucketSpec,
    records: HashMap<EntityId, MirroredRecord>,
    order: Vec<EntityId>,
    pending: Vec<PendingEntity>,
    open_commits: HashMap<CommitType, Commit>,
}

impl BucketMirror {
    /// Empty mirror for `spec`.
    pub fn new(spec: BucketSpec) -> Self {
        Self {
            spec,
            records: HashMap::new(),
            order: Vec::new(),
            pending: Vec::new(),
            open_commits: HashMap::new(),
        }
    }

    /// Bucket this mirror holds.
    pub fn spec(&self) -> &BucketSpec {
        &self.spec
    }

    /// Mirrored record count.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when nothing is mirrored.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Record by key.
    pub fn get(&self, id: &EntityId) -> Option<&MirroredRecord> {
        self.records.get(id)
    }

    /// True when `id` is mirrored.
    pub fn contains(&self, id: &EntityId) -> bool {
        self.records.contains_key(id)
    }

    /// Records in insertion order.
    pub fn records(&self) -> impl Iterator<Item = &MirroredRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    /// Owned copy of [`Self::records`].
    pub fn records_cloned(&self) -> Vec<MirroredRecord> {
        self.records().cloned().collect()
    }

    /// Keys in insertion order.
    pub fn ordered_ids(&self) -> &[EntityId] {
        &self.order
    }

    /// Entities staged by PUT_CONTENT and not yet merged.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Cycle in progress for `commit_type`, if any.
    pub fn open_commit(&self, commit_type: CommitType) -> Option<&Commit> {
        self.open_commits.get(&commit_type)
    }

    /// Types with a cycle in progress, ascending.
    pub fn open_commit_types(&self) -> Vec<CommitType> {
        let mut types: Vec<CommitType> = self.open_commits.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// True when the ordered view and the key index agree exactly.
    pub fn is_consistent(&self) -> bool {
        if self.order.len() != self.records.len() {
            return false;
        }
        let mut seen = HashSet::with_capacity(self.order.len());
        self.order
            .iter()
            .all(|id| seen.insert(id) && self.records.contains_key(id))
    }

    /// Extracts the key for `fields` using this bucket's key field.
    pub fn entity_id(&self, fields: &Record) -> Option<EntityId> {
        fields
            .get(&self.spec.uuid_field)
            .and_then(Value::key_text)
            .map(EntityId)
    }

    /// Merges one decoded bootstrap page.
    ///
    /// Every record is keyed before anything is touched, so a bad page leaves
    /// the mirror unchanged.
    pub fn merge_page(&mut self, page: Vec<Record>) -> Result<MirrorChange, MirrorError> {
        let mut keyed = Vec::with_capacity(page.len());
        for (index, fields) in page.into_iter().enumerate() {
            let id = self.entity_id(&fields).ok_or_else(|| MirrorError::MissingKey {
                index,
                field: self.spec.uuid_field.clone(),
            })?;
            let commit = self.bootstrap_tag(&fields);
            keyed.push((id, fields, commit));
        }

        let mut change = MirrorChange::default();
        for (id, fields, commit) in keyed {
            change.ingested.push(self.merge_one(id, fields, commit).clone());
        }
        Ok(change)
    }

    /// Merges every staged entity, in arrival order.
    pub fn apply_pending(&mut self) -> MirrorChange {
        let mut change = MirrorChange::default();
        if self.pending.is_empty() {
            return change;
        }

        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();
        for entity in pending {
            change
                .ingested
                .push(self.merge_one(entity.id, entity.fields, entity.commit).clone());
        }
        debug!(bucket = %self.spec.name, count, "applied staged changes");
        change
    }

    /// Drops every open cycle. Called when the transport disconnects, since a
    /// gap in the stream makes any partial `updated_ids` untrustworthy.
    pub fn abandon_open_commits(&mut self) -> usize {
        let count = self.open_commits.len();
        self.open_commits.clear();
        if count > 0 {
            info!(bucket = %self.spec.name, count, "lost connection, discarded open commits");
        }
        count
    }

    /// Applies one commit event. Only a failed prune returns `Err`.
    pub fn apply_commit(&mut self, event: CommitEvent) -> Result<CommitApplied, MirrorError> {
        match event.phase {
            CommitPhase::Create => Ok(self.on_create(event.commit_type, event.commit_id)),
            CommitPhase::PutContent => Ok(self.on_put(event.commit_type, &event.commit_id, event.entity)),
            CommitPhase::Finalize => self.on_finalize(event.commit_type, &event.commit_id),
        }
    }

    /// Removes `ids` from both views. Every id must be present in both.
    pub fn remove(&mut self, ids: &[EntityId]) -> Result<Vec<MirroredRecord>, MirrorError> {
        let targets: HashSet<&EntityId> = ids.iter().collect();
        let missing = {
            let in_order: HashSet<&EntityId> =
                self.order.iter().filter(|id| targets.contains(id)).collect();
            targets
                .iter()
                .find(|id| !in_order.contains(**id) || !self.records.contains_key(**id))
                .map(|id| (*id).clone())
        };
        if let Some(id) = missing {
            return Err(ConsistencyError::MissingFromContent { id }.into());
        }

        self.order.retain(|id| !targets.contains(id));
        let mut removed = Vec::with_capacity(targets.len());
        for id in ids {
            if let Some(rec) = self.records.remove(id) {
                removed.push(rec);
            }
        }
        Ok(removed)
    }

    fn on_create(&mut self, commit_type: CommitType, commit_id: String) -> CommitApplied {
        self.pending.retain(|p| p.commit.commit_type != commit_type);
        let abandoned = self
            .open_commits
            .insert(commit_type, Commit::new(commit_type, commit_id.clone()))
            .map(|old| old.id);
        info!(
            bucket = %self.spec.name,
            commit = %commit_id,
            commit_type,
            abandoned = ?abandoned,
            "new commit created"
        );
        CommitApplied::unchanged(CommitOutcome::Opened { abandoned })
    }

    fn on_put(&mut self, commit_type: CommitType, commit_id: &str, entity: Option<Record>) -> CommitApplied {
        if let Err(reason) = self.check_open(commit_type, commit_id) {
            return CommitApplied::unchanged(CommitOutcome::Ignored(reason));
        }
        let Some(fields) = entity else {
            return CommitApplied::unchanged(CommitOutcome::Ignored(IgnoredReason::MissingEntity));
        };
        let Some(id) = self.entity_id(&fields) else {
            debug!(bucket = %self.spec.name, commit = %commit_id, "staged entity has no key; dropped");
            return CommitApplied::unchanged(CommitOutcome::Ignored(IgnoredReason::MissingKey));
        };

        if let Some(commit) = self.open_commits.get_mut(&commit_type) {
            commit.updated_ids.insert(id.clone());
        }
        self.pending.push(PendingEntity {
            id: id.clone(),
            fields,
            commit: CommitTag {
                commit_id: Some(commit_id.to_string()),
                commit_type,
            },
        });
        CommitApplied::unchanged(CommitOutcome::Staged { id })
    }

    fn on_finalize(&mut self, commit_type: CommitType, commit_id: &str) -> Result<CommitApplied, MirrorError> {
        if let Err(reason) = self.check_open(commit_type, commit_id) {
            return Ok(CommitApplied::unchanged(CommitOutcome::Ignored(reason)));
        }
        let Some(commit) = self.open_commits.remove(&commit_type) else {
            return Ok(CommitApplied::unchanged(CommitOutcome::Ignored(IgnoredReason::NoOpenCommit)));
        };

        let mut change = self.apply_pending();
        let applied = change.ingested.len();

        let prune: Vec<EntityId> = self
            .records()
            .filter(|r| r.commit.commit_type == commit_type && !commit.updated_ids.contains(&r.id))
            .map(|r| r.id.clone())
            .collect();
        let removed = self.remove(&prune)?;

        info!(
            bucket = %self.spec.name,
            commit = %commit.id,
            commit_type,
            updated = commit.updated_ids.len(),
            removed = removed.len(),
            applied,
            "finalized commit"
        );

        let outcome = CommitOutcome::Finalized {
            applied,
            updated: commit.updated_ids.len(),
            removed: removed.len(),
        };
        change.removed.extend(removed);
        Ok(CommitApplied { outcome, change })
    }

    fn check_open(&self, commit_type: CommitType, commit_id: &str) -> Result<(), IgnoredReason> {
        match self.open_commits.get(&commit_type) {
            None => Err(IgnoredReason::NoOpenCommit),
            Some(open) if !open.matches(commit_id) => Err(IgnoredReason::StaleCommit {
                open: open.id.clone(),
            }),
            Some(_) => Ok(()),
        }
    }

    fn bootstrap_tag(&self, fields: &Record) -> CommitTag {
        let commit_type = fields
            .get("commit_type")
            .and_then(Value::as_i64)
            .and_then(|v| CommitType::try_from(v).ok())
            .unwrap_or(self.spec.commit_type);
        let commit_id = fields
            .get("commit_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        CommitTag {
            commit_id,
            commit_type,
        }
    }

    fn merge_one(&mut self, id: EntityId, fields: Record, commit: CommitTag) -> &MirroredRecord {
        match self.records.entry(id) {
            Entry::Occupied(entry) => {
                let rec = entry.into_mut();
                rec.merge(fields, commit);
                rec
            }
            Entry::Vacant(entry) => {
                let id = entry.key().clone();
                self.order.push(id.clone());
                entry.insert(MirroredRecord { id, commit, fields })
            }
        }
    }
}
