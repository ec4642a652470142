//! A filtered copy of one bucket that reports what entered, changed, and left.
//!
//! The view does not subscribe to anything itself. Feed it every
//! [`MirrorChange`] the source produces, in order, and it re-evaluates only
//! the records named in the change. [`FilteredView::refresh_filters`]
//! re-evaluates the whole source and is linear in its size.

use hashbrown::{HashMap, HashSet};
use tokio::sync::broadcast;

use crate::{core::commit::MirrorChange, record::MirroredRecord, types::EntityId};

use super::traits::Predicate;

/// Delta produced by one batch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewChange {
    /// Records that entered the view.
    pub added: Vec<MirroredRecord>,
    /// Visible records whose fields changed.
    pub updated: Vec<MirroredRecord>,
    /// Records that left the view.
    pub removed: Vec<MirroredRecord>,
}

impl ViewChange {
    /// True when all three lists are empty.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Change notifications from a [`FilteredView`].
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    /// Records entered the view.
    Added(Vec<MirroredRecord>),
    /// Visible records changed.
    Updated(Vec<MirroredRecord>),
    /// Records left the view.
    Removed(Vec<MirroredRecord>),
    /// All three lists of one batch; sent after the granular events.
    Changed(ViewChange),
}

/// Cached subset of a mirror that passes every filter.
pub struct FilteredView {
    filters: Vec<Box<dyn Predicate>>,
    visible: HashMap<EntityId, MirroredRecord>,
    order: Vec<EntityId>,
    events_tx: broadcast::Sender<ViewEvent>,
}

impl FilteredView {
    /// Starts with no filters, so every source record is visible.
    pub fn new<'a>(source: impl IntoIterator<Item = &'a MirroredRecord>) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        let mut view = Self {
            filters: Vec::new(),
            visible: HashMap::new(),
            order: Vec::new(),
            events_tx,
        };
        let mut dropped = HashSet::new();
        for record in source {
            view.insert(record.clone(), &mut dropped);
        }
        view
    }

    /// New receiver for view events.
    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.events_tx.subscribe()
    }

    /// Visible record count.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when nothing is visible.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// True when `id` is visible.
    pub fn contains(&self, id: &EntityId) -> bool {
        self.visible.contains_key(id)
    }

    /// Visible record by key.
    pub fn get(&self, id: &EntityId) -> Option<&MirroredRecord> {
        self.visible.get(id)
    }

    /// Visible records in the order they entered the view.
    pub fn records(&self) -> impl Iterator<Item = &MirroredRecord> {
        self.order.iter().filter_map(|id| self.visible.get(id))
    }

    /// Active filter count.
    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    /// True when every filter accepts `record`.
    pub fn passes(&self, record: &MirroredRecord) -> bool {
        self.filters.iter().all(|f| f.accepts(record))
    }

    /// Adds a filter and re-evaluates the whole source.
    pub fn add_filter<'a, P>(&mut self, filter: P, source: impl IntoIterator<Item = &'a MirroredRecord>) -> ViewChange
    where
        P: Predicate + 'static,
    {
        self.filters.push(Box::new(filter));
        self.refresh_filters(source)
    }

    /// Drops every filter and re-evaluates the whole source.
    pub fn clear_filters<'a>(&mut self, source: impl IntoIterator<Item = &'a MirroredRecord>) -> ViewChange {
        self.filters.clear();
        self.refresh_filters(source)
    }

    /// Re-evaluates every source record. Afterwards the visible set is exactly
    /// the source records that pass; records no longer in the source leave.
    pub fn refresh_filters<'a>(&mut self, source: impl IntoIterator<Item = &'a MirroredRecord>) -> ViewChange {
        let mut change = ViewChange::default();
        let mut seen: HashSet<EntityId> = HashSet::new();
        let mut dropped: HashSet<EntityId> = HashSet::new();

        for record in source {
            seen.insert(record.id.clone());
            let passed = self.passes(record);
            let known = self.visible.contains_key(&record.id);
            match (known, passed) {
                (false, true) => {
                    self.insert(record.clone(), &mut dropped);
                    change.added.push(record.clone());
                }
                (true, true) => {
                    if let Some(current) = self.visible.get_mut(&record.id) {
                        if *current != *record {
                            *current = record.clone();
                            change.updated.push(record.clone());
                        }
                    }
                }
                (true, false) => {
                    if let Some(old) = self.take(&record.id, &mut dropped) {
                        change.removed.push(old);
                    }
                }
                (false, false) => {}
            }
        }

        let gone: Vec<EntityId> = self.order.iter().filter(|id| !seen.contains(*id)).cloned().collect();
        for id in gone {
            if let Some(old) = self.take(&id, &mut dropped) {
                change.removed.push(old);
            }
        }

        self.compact(&dropped);
        self.fire(&change);
        change
    }

    /// Applies one source delta, touching only the records it names.
    pub fn apply_change(&mut self, source_change: &MirrorChange) -> ViewChange {
        let mut change = ViewChange::default();
        let mut dropped: HashSet<EntityId> = HashSet::new();

        for record in &source_change.ingested {
            let passed = self.passes(record);
            let known = self.visible.contains_key(&record.id);
            match (known, passed) {
                (false, true) => {
                    self.insert(record.clone(), &mut dropped);
                    change.added.push(record.clone());
                }
                (true, true) => {
                    if let Some(current) = self.visible.get_mut(&record.id) {
                        *current = record.clone();
                    }
                    change.updated.push(record.clone());
                }
                (true, false) => {
                    if let Some(old) = self.take(&record.id, &mut dropped) {
                        change.removed.push(old);
                    }
                }
                (false, false) => {}
            }
        }

        for record in &source_change.removed {
            if let Some(old) = self.take(&record.id, &mut dropped) {
                change.removed.push(old);
            }
        }

        self.compact(&dropped);
        self.fire(&change);
        change
    }

    /// An id taken earlier in the same batch is still in `order`; it keeps
    /// its slot instead of being pushed twice.
    fn insert(&mut self, record: MirroredRecord, dropped: &mut HashSet<EntityId>) {
        let id = record.id.clone();
        if self.visible.insert(id.clone(), record).is_none() && !dropped.remove(&id) {
            self.order.push(id);
        }
    }

    /// Removes from the lookup only; `order` is compacted once per batch.
    fn take(&mut self, id: &EntityId, dropped: &mut HashSet<EntityId>) -> Option<MirroredRecord> {
        let old = self.visible.remove(id)?;
        dropped.insert(id.clone());
        Some(old)
    }

    fn compact(&mut self, dropped: &HashSet<EntityId>) {
        if !dropped.is_empty() {
            self.order.retain(|id| !dropped.contains(id));
        }
    }

    fn fire(&self, change: &ViewChange) {
        if change.is_empty() {
            return;
        }
        if !change.added.is_empty() {
            let _ = self.events_tx.send(ViewEvent::Added(change.added.clone()));
        }
        if !change.updated.is_empty() {
            let _ = self.events_tx.send(ViewEvent::Updated(change.updated.clone()));
        }
        if !change.removed.is_empty() {
            let _ = self.events_tx.send(ViewEvent::Removed(change.removed.clone()));
        }
        let _ = self.events_tx.send(ViewEvent::Changed(change.clone()));
    }
}
