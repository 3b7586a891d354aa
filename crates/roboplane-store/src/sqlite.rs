//! File-backed store backend.
//!
//! # Storage layout
//!
//! Two SQLite tables are created (if they do not already exist):
//!
//! | table | columns | description |
//! |---|---|---|
//! | `mesh_hashes` | `key`, `field`, `value` (PK `key, field`) | hash entries; `rowid` keeps insertion order |
//! | `mesh_lists` | `id` (autoincrement), `key`, `value` | list elements; lowest `id` is the head |
//!
//! SQLite has no notification mechanism, so [`SqliteStore`] does not
//! implement [`PubSub`](crate::PubSub) and `blpop` polls.
//!
//! # Example
//!
//! ```rust
//! use roboplane_store::{HashStore, ListStore, SqliteStore};
//!
//! let store = SqliteStore::open_in_memory().unwrap();
//! store.hset("mesh:nodes", "scout-1", "{}").unwrap();
//! store.rpush("mesh:tasks:scout-1", "job").unwrap();
//! assert_eq!(store.lpop("mesh:tasks:scout-1").unwrap().as_deref(), Some("job"));
//! ```

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use rusqlite::{Connection, OptionalExtension, params};

use crate::backend::{HashStore, ListStore};
use crate::error::StoreError;

/// Interval between polls in a blocking pop.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// SQLite-backed hash and list store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a persistent store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open a temporary in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS mesh_hashes (
                key   TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (key, field)
            );
            CREATE TABLE IF NOT EXISTS mesh_lists (
                id    INTEGER PRIMARY KEY AUTOINCREMENT,
                key   TEXT NOT NULL,
                value TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS mesh_lists_key ON mesh_lists (key, id);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl HashStore for SqliteStore {
    fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO mesh_hashes (key, field, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (key, field) DO UPDATE SET value = excluded.value",
            params![key, field, value],
        )?;
        Ok(())
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn()?
            .query_row(
                "SELECT value FROM mesh_hashes WHERE key = ?1 AND field = ?2",
                params![key, field],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn hgetall(&self, key: &str) -> Result<IndexMap<String, String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT field, value FROM mesh_hashes WHERE key = ?1 ORDER BY rowid")?;
        let rows = stmt.query_map(params![key], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = IndexMap::new();
        for row in rows {
            let (field, value) = row?;
            out.insert(field, value);
        }
        Ok(out)
    }

    fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let n = self.conn()?.execute(
            "DELETE FROM mesh_hashes WHERE key = ?1 AND field = ?2",
            params![key, field],
        )?;
        Ok(n > 0)
    }
}

impl ListStore for SqliteStore {
    fn rpush(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO mesh_lists (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        let len: i64 = conn.query_row(
            "SELECT COUNT(*) FROM mesh_lists WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(len).unwrap_or_default())
    }

    fn lpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let head: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, value FROM mesh_lists WHERE key = ?1 ORDER BY id LIMIT 1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((id, _)) = &head {
            tx.execute("DELETE FROM mesh_lists WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(head.map(|(_, value)| value))
    }

    fn blpop(&self, key: &str, timeout: Option<Duration>) -> Result<Option<String>, StoreError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(value) = self.lpop(key)? {
                return Ok(Some(value));
            }
            let step = match deadline {
                None => POLL_INTERVAL,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    POLL_INTERVAL.min(deadline - now)
                }
            };
            std::thread::sleep(step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hset_overwrites_and_keeps_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.hset("h", "b", "1").unwrap();
        store.hset("h", "a", "2").unwrap();
        store.hset("h", "b", "3").unwrap();
        let all = store.hgetall("h").unwrap();
        let pairs: Vec<_> = all.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(pairs, vec![("b", "3"), ("a", "2")]);
    }

    #[test]
    fn hdel_reports_presence() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.hset("h", "a", "1").unwrap();
        assert!(store.hdel("h", "a").unwrap());
        assert!(!store.hdel("h", "a").unwrap());
        assert_eq!(store.hget("h", "a").unwrap(), None);
    }

    #[test]
    fn lists_are_fifo_per_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.rpush("q1", "A").unwrap();
        store.rpush("q2", "X").unwrap();
        assert_eq!(store.rpush("q1", "B").unwrap(), 2);
        assert_eq!(store.lpop("q1").unwrap().as_deref(), Some("A"));
        assert_eq!(store.lpop("q1").unwrap().as_deref(), Some("B"));
        assert_eq!(store.lpop("q1").unwrap(), None);
        assert_eq!(store.lpop("q2").unwrap().as_deref(), Some("X"));
    }

    #[test]
    fn blpop_times_out() {
        let store = SqliteStore::open_in_memory().unwrap();
        let got = store.blpop("q", Some(Duration::from_millis(30))).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.hset("mesh:nodes", "scout", "robot.scout@dock").unwrap();
            store.rpush("mesh:tasks:scout", "job").unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.hget("mesh:nodes", "scout").unwrap().as_deref(),
            Some("robot.scout@dock")
        );
        assert_eq!(store.lpop("mesh:tasks:scout").unwrap().as_deref(), Some("job"));
    }
}
