use std::collections::BTreeSet;

use proptest::prelude::*;

use bucketsync::{
    core::{
        bucket::BucketSpec,
        commit::{CommitEvent, MirrorChange},
        mirror::BucketMirror,
    },
    record::{MirroredRecord, Record, Value},
    types::EntityId,
    view::{
        filtered::{FilteredView, ViewChange, ViewEvent},
        traits::FieldEquals,
    },
};

fn dino(id: &str, species: &str, level: i64) -> Record {
    let mut r = Record::new();
    r.insert("dino_id", id);
    r.insert("species", species);
    r.insert("level", Value::Int(level));
    r
}

fn ids<'a>(records: impl IntoIterator<Item = &'a MirroredRecord>) -> Vec<String> {
    records.into_iter().map(|r| r.id.as_str().to_string()).collect()
}

fn mirror_with(records: Vec<Record>) -> BucketMirror {
    let mut mirror = BucketMirror::new(BucketSpec::dinos());
    mirror.merge_page(records).expect("page");
    mirror
}

#[test]
fn unfiltered_view_starts_as_a_copy() {
    let mirror = mirror_with(vec![dino("a", "rex", 1), dino("b", "raptor", 2)]);
    let view = FilteredView::new(mirror.records());

    assert_eq!(view.len(), 2);
    assert_eq!(view.filter_count(), 0);
    assert_eq!(ids(view.records()), vec!["a", "b"]);
}

#[test]
fn adding_a_filter_removes_what_fails_it() {
    let mirror = mirror_with(vec![
        dino("a", "rex", 1),
        dino("b", "raptor", 2),
        dino("c", "rex", 3),
    ]);
    let mut view = FilteredView::new(mirror.records());
    let mut events = view.subscribe();

    let change = view.add_filter(FieldEquals::new("species", "rex"), mirror.records());

    assert!(change.added.is_empty());
    assert!(change.updated.is_empty());
    assert_eq!(ids(&change.removed), vec!["b"]);
    assert_eq!(ids(view.records()), vec!["a", "c"]);

    assert_eq!(events.try_recv().expect("removed"), ViewEvent::Removed(change.removed.clone()));
    assert_eq!(events.try_recv().expect("changed"), ViewEvent::Changed(change));
    assert!(events.try_recv().is_err());
}

#[test]
fn filters_combine_conjunctively_and_clear_restores_everything() {
    let mirror = mirror_with(vec![
        dino("a", "rex", 10),
        dino("b", "rex", 50),
        dino("c", "raptor", 60),
    ]);
    let mut view = FilteredView::new(mirror.records());

    view.add_filter(FieldEquals::new("species", "rex"), mirror.records());
    view.add_filter(
        |r: &MirroredRecord| r.fields.get("level").and_then(Value::as_i64).is_some_and(|l| l >= 20),
        mirror.records(),
    );
    assert_eq!(ids(view.records()), vec!["b"]);
    assert_eq!(view.filter_count(), 2);

    let change = view.clear_filters(mirror.records());
    assert_eq!(view.filter_count(), 0);
    assert_eq!(ids(&change.added), vec!["a", "c"]);
    assert_eq!(view.len(), 3);
}

#[test]
fn refresh_without_source_changes_reports_nothing() {
    let mirror = mirror_with(vec![dino("a", "rex", 1)]);
    let mut view = FilteredView::new(mirror.records());
    let mut events = view.subscribe();

    let change = view.refresh_filters(mirror.records());
    assert!(change.is_empty());
    assert!(events.try_recv().is_err());
}

#[test]
fn commit_deltas_flow_through_the_view() {
    let mut mirror = mirror_with(vec![
        dino("a", "rex", 1),
        dino("b", "rex", 2),
        dino("c", "raptor", 3),
    ]);
    let mut view = FilteredView::new(mirror.records());
    view.add_filter(FieldEquals::new("species", "rex"), mirror.records());
    let mut events = view.subscribe();

    mirror.apply_commit(CommitEvent::create(0, "c1")).expect("create");
    mirror
        .apply_commit(CommitEvent::put(0, "c1", dino("a", "rex", 9)))
        .expect("put a");
    mirror
        .apply_commit(CommitEvent::put(0, "c1", dino("c", "rex", 3)))
        .expect("put c");
    mirror
        .apply_commit(CommitEvent::put(0, "c1", dino("d", "raptor", 1)))
        .expect("put d");
    let done = mirror.apply_commit(CommitEvent::finalize(0, "c1")).expect("finalize");

    let change = view.apply_change(&done.change);
    assert_eq!(ids(&change.added), vec!["c"]);
    assert_eq!(ids(&change.updated), vec!["a"]);
    assert_eq!(ids(&change.removed), vec!["b"]);
    assert_eq!(ids(view.records()), vec!["a", "c"]);
    assert_eq!(
        view.get(&EntityId::from("a")).and_then(|r| r.fields.get("level")),
        Some(&Value::Int(9))
    );

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(match event {
            ViewEvent::Added(_) => "added",
            ViewEvent::Updated(_) => "updated",
            ViewEvent::Removed(_) => "removed",
            ViewEvent::Changed(_) => "changed",
        });
    }
    assert_eq!(kinds, vec!["added", "updated", "removed", "changed"]);
}

#[test]
fn record_leaving_the_filter_is_removed_on_update() {
    let mut mirror = mirror_with(vec![dino("a", "rex", 1)]);
    let mut view = FilteredView::new(mirror.records());
    view.add_filter(FieldEquals::new("species", "rex"), mirror.records());

    mirror.apply_commit(CommitEvent::create(0, "c1")).expect("create");
    mirror
        .apply_commit(CommitEvent::put(0, "c1", dino("a", "dodo", 1)))
        .expect("put");
    let change = view.apply_change(&mirror.apply_pending());

    assert_eq!(ids(&change.removed), vec!["a"]);
    assert!(view.is_empty());
    assert!(!view.contains(&EntityId::from("a")));
}

#[test]
fn empty_delta_fires_nothing() {
    let mirror = mirror_with(vec![dino("a", "rex", 1)]);
    let mut view = FilteredView::new(mirror.records());
    let mut events = view.subscribe();

    assert_eq!(view.apply_change(&Default::default()), ViewChange::default());
    assert!(events.try_recv().is_err());
}

#[test]
fn batch_prune_keeps_the_survivors_in_order() {
    let names = ["a", "b", "c", "d", "e", "f", "g"];
    let mut mirror = mirror_with(names.iter().map(|n| dino(n, "rex", 1)).collect());
    let mut view = FilteredView::new(mirror.records());

    mirror.apply_commit(CommitEvent::create(0, "c1")).expect("create");
    for keep in ["a", "c", "g"] {
        mirror
            .apply_commit(CommitEvent::put(0, "c1", dino(keep, "rex", 1)))
            .expect("put");
    }
    let done = mirror.apply_commit(CommitEvent::finalize(0, "c1")).expect("finalize");

    let change = view.apply_change(&done.change);
    assert_eq!(ids(&change.removed), vec!["b", "d", "e", "f"]);
    assert_eq!(ids(view.records()), vec!["a", "c", "g"]);
    assert_eq!(view.len(), 3);
}

#[test]
fn record_leaving_and_returning_in_one_batch_is_listed_once() {
    let mirror = mirror_with(vec![dino("a", "rex", 1), dino("b", "rex", 2)]);
    let mut view = FilteredView::new(mirror.records());
    view.add_filter(FieldEquals::new("species", "rex"), mirror.records());

    let mut left = mirror.get(&EntityId::from("a")).cloned().expect("a");
    left.fields.insert("species", "dodo");
    let back = mirror.get(&EntityId::from("a")).cloned().expect("a");
    let change = view.apply_change(&MirrorChange {
        ingested: vec![left, back],
        removed: Vec::new(),
    });

    assert_eq!(ids(&change.removed), vec!["a"]);
    assert_eq!(ids(&change.added), vec!["a"]);
    assert_eq!(ids(view.records()), vec!["a", "b"]);
    assert_eq!(view.records().count(), view.len());
}

#[derive(Debug, Clone)]
enum Step {
    Page(Vec<(u8, u8)>),
    Commit { keep: Vec<u8> },
    Filter(u8),
    Clear,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        prop::collection::vec((0u8..16, 0u8..3), 0..8).prop_map(Step::Page),
        prop::collection::vec(0u8..16, 0..8).prop_map(|keep| Step::Commit { keep }),
        (0u8..3).prop_map(Step::Filter),
        Just(Step::Clear),
    ]
}

fn species(n: u8) -> &'static str {
    ["rex", "raptor", "dodo"][usize::from(n % 3)]
}

proptest! {
    #[test]
    fn incremental_view_matches_a_fresh_evaluation(steps in prop::collection::vec(step_strategy(), 1..40)) {
        let mut mirror = BucketMirror::new(BucketSpec::dinos());
        let mut view = FilteredView::new(mirror.records());
        let mut allowed: Option<&'static str> = None;
        let mut commit = 0u32;

        for step in steps {
            match step {
                Step::Page(entries) => {
                    let page = entries
                        .iter()
                        .map(|(k, s)| dino(&format!("d{k}"), species(*s), i64::from(*k)))
                        .collect();
                    let change = mirror.merge_page(page).expect("page");
                    view.apply_change(&change);
                }
                Step::Commit { keep } => {
                    commit += 1;
                    let id = format!("c{commit}");
                    mirror.apply_commit(CommitEvent::create(0, id.clone())).expect("create");
                    for k in &keep {
                        mirror
                            .apply_commit(CommitEvent::put(0, id.clone(), dino(&format!("d{k}"), species(*k), 0)))
                            .expect("put");
                    }
                    let done = mirror.apply_commit(CommitEvent::finalize(0, id)).expect("finalize");
                    view.apply_change(&done.change);
                }
                Step::Filter(s) => {
                    if allowed.is_none() {
                        allowed = Some(species(s));
                        view.add_filter(FieldEquals::new("species", species(s)), mirror.records());
                    }
                }
                Step::Clear => {
                    allowed = None;
                    view.clear_filters(mirror.records());
                }
            }

            let expected: BTreeSet<String> = mirror
                .records()
                .filter(|r| allowed.is_none_or(|s| r.fields.get("species").and_then(Value::as_str) == Some(s)))
                .map(|r| r.id.as_str().to_string())
                .collect();
            let actual: BTreeSet<String> = view.records().map(|r| r.id.as_str().to_string()).collect();
            prop_assert_eq!(&actual, &expected);
            prop_assert_eq!(view.len(), expected.len());

            for record in view.records() {
                prop_assert_eq!(Some(record), mirror.get(&record.id));
            }
        }
    }
}
