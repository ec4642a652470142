//! Epoch bookkeeping: the last server epoch seen per `(scope, kind)`.
//!
//! Callers that cache content use the stored epoch to ask the server only
//! for entities changed since then. A missing entry reads as zero.

pub mod sqlite;

use hashbrown::HashMap;
use thiserror::Error;

/// Epoch store failures.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Underlying SQLite error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result alias for epoch stores.
pub type PersistResult<T> = Result<T, PersistError>;

/// Persistent `(scope, kind) -> epoch` map.
pub trait EpochStore: Send {
    /// Stored epoch, or 0 when none was recorded.
    fn get(&self, scope: &str, kind: &str) -> PersistResult<i64>;
    /// Records `epoch`, replacing any earlier value.
    fn set(&mut self, scope: &str, kind: &str, epoch: i64) -> PersistResult<()>;
}

/// Process-local store, lost on exit.
#[derive(Debug, Default, Clone)]
pub struct MemoryEpochStore {
    entries: HashMap<(String, String), i64>,
}

impl MemoryEpochStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl EpochStore for MemoryEpochStore {
    fn get(&self, scope: &str, kind: &str) -> PersistResult<i64> {
        Ok(self
            .entries
            .get(&(scope.to_string(), kind.to_string()))
            .copied()
            .unwrap_or(0))
    }

    fn set(&mut self, scope: &str, kind: &str, epoch: i64) -> PersistResult<()> {
        self.entries.insert((scope.to_string(), kind.to_string()), epoch);
        Ok(())
    }
}
