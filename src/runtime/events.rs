//! Runtime event stream payloads.

use crate::{
    core::commit::MirrorChange,
    types::{BucketKey, PageIndex},
};

/// Events emitted from the runtime loop, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A bucket's membership or field values changed.
    ContentChanged {
        /// Bucket that changed.
        key: BucketKey,
        /// Records ingested and removed.
        change: MirrorChange,
    },
    /// One bootstrap page was merged.
    BootstrapProgress {
        /// Bucket being bootstrapped.
        key: BucketKey,
        /// Zero-based page index.
        page: PageIndex,
        /// Records in this page.
        count: usize,
        /// Records merged so far in this bootstrap.
        received: usize,
    },
    /// The last page landed; commits are applied from now on.
    BootstrapComplete {
        /// Bucket that went live.
        key: BucketKey,
        /// Mirror size after the bootstrap.
        total: usize,
    },
    /// A page could not be fetched, decoded, or keyed. The bucket keeps what it had.
    BootstrapFailed {
        /// Bucket that failed.
        key: BucketKey,
        /// Page that failed.
        page: PageIndex,
        /// Error text.
        reason: String,
    },
    /// A commit cycle finished.
    CommitFinalized {
        /// Bucket the cycle belonged to.
        key: BucketKey,
        /// Server-issued cycle id.
        commit_id: String,
        /// Staged entities merged at finalize.
        applied: usize,
        /// Keys the cycle touched.
        updated: usize,
        /// Records pruned.
        removed: usize,
    },
    /// The link logged in.
    LinkUp,
    /// The link dropped; open commits were discarded.
    LinkDown,
    /// Mirror bookkeeping diverged. The runtime stopped after sending this.
    Faulted {
        /// Bucket whose bookkeeping diverged.
        key: BucketKey,
        /// Error text.
        reason: String,
    },
}
