//! SQLite-backed epoch store.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};

use super::{EpochStore, PersistResult};

/// SQLite implementation of [`crate::persist::EpochStore`].
pub struct SqliteEpochStore {
    conn: Connection,
}

impl SqliteEpochStore {
    /// Opens or creates a store at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Every stored `(kind, epoch)` for `scope`, ordered by kind.
    pub fn entries_for(&self, scope: &str) -> PersistResult<Vec<(String, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, epoch FROM epochs WHERE scope = ?1 ORDER BY kind ASC")?;
        let rows = stmt.query_map(params![scope], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Forgets every epoch of `scope`. Returns the number of rows removed.
    pub fn clear_scope(&mut self, scope: &str) -> PersistResult<usize> {
        let count = self
            .conn
            .execute("DELETE FROM epochs WHERE scope = ?1", params![scope])?;
        Ok(count)
    }
}

impl EpochStore for SqliteEpochStore {
    fn get(&self, scope: &str, kind: &str) -> PersistResult<i64> {
        let epoch: Option<i64> = self
            .conn
            .query_row(
                "SELECT epoch FROM epochs WHERE scope = ?1 AND kind = ?2",
                params![scope, kind],
                |row| row.get(0),
            )
            .optional()?;
        Ok(epoch.unwrap_or(0))
    }

    fn set(&mut self, scope: &str, kind: &str, epoch: i64) -> PersistResult<()> {
        self.conn.execute(
            "INSERT INTO epochs(scope, kind, epoch, updated_ms) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(scope, kind) DO UPDATE SET epoch = excluded.epoch, updated_ms = excluded.updated_ms",
            params![scope, kind, epoch, now_ms() as i64],
        )?;
        Ok(())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
