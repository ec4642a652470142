//! Per-bucket mirror state machine and its bootstrap/commit inputs.

/// Bootstrap paging and page decoding.
pub mod bootstrap;
/// Bucket descriptors and presets.
pub mod bucket;
/// Commit protocol events and bookkeeping.
pub mod commit;
/// Authoritative mirrored collection.
pub mod mirror;
