//! Filtered subsets of a mirrored bucket.

/// Incrementally maintained filtered view.
pub mod filtered;
/// Predicate trait and stock predicates.
pub mod traits;
