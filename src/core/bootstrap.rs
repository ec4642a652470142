//! Page cursor for the bulk bootstrap transfer.
//!
//! The endpoint has no explicit record count: a page shorter than the
//! requested limit ends the transfer.

use serde::{Deserialize, Serialize};

use crate::types::PageIndex;

/// Page size used when no configuration overrides it.
pub const DEFAULT_PAGE_SIZE: u32 = 300;

/// One page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Zero-based page index.
    pub page: PageIndex,
    /// Maximum records the server may return.
    pub limit: u32,
}

impl PageRequest {
    /// Records to skip on the server side.
    pub fn skip(&self) -> u64 {
        u64::from(self.page) * u64::from(self.limit)
    }
}

/// Tracks paging progress for one bucket.
#[derive(Debug, Clone)]
pub struct PageCursor {
    limit: u32,
    next_page: PageIndex,
    received: usize,
    done: bool,
}

impl PageCursor {
    /// Starts at page zero. A zero limit is bumped to one.
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            next_page: 0,
            received: 0,
            done: false,
        }
    }

    /// Next page to fetch, or `None` once the end sentinel was seen.
    pub fn next_request(&self) -> Option<PageRequest> {
        if self.done {
            return None;
        }
        Some(PageRequest {
            page: self.next_page,
            limit: self.limit,
        })
    }

    /// Records a landed page of `count` records. Returns true when more pages follow.
    pub fn record_page(&mut self, count: usize) -> bool {
        self.received += count;
        self.next_page += 1;
        if count < self.limit as usize {
            self.done = true;
        }
        !self.done
    }

    /// Total records received so far.
    pub fn received(&self) -> usize {
        self.received
    }

    /// True after a short page.
    pub fn is_done(&self) -> bool {
        self.done
    }
}
