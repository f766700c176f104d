//! Durable breadcrumb storage.
//!
//! The orchestrator records the in-flight job in a small key/value store so
//! a later session can notice an interrupted run and recover it. Two
//! backends: [`MemoryStore`] for a single process lifetime and
//! [`SqliteStore`] for breadcrumbs that survive a restart.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

/// Id of the job currently being observed.
pub const CURRENT_JOB_KEY: &str = "currentResearchJobId";
/// JSON `{jobId, lastStep, timestamp, chatId}`.
pub const CONNECTION_METADATA_KEY: &str = "researchConnectionMetadata";
/// Chat the active job belongs to.
pub const ACTIVE_CHAT_KEY: &str = "activeResearchChatId";

/// Minimal string key/value store.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

pub type SharedStore = Arc<dyn SessionStore>;

/// In-process store. Lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStore {
        Arc::new(Self::new())
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// SQLite-backed store with a single `breadcrumbs(key, value)` table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS breadcrumbs (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl SessionStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let value = conn
            .query_row(
                "SELECT value FROM breadcrumbs WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute(
            "INSERT INTO breadcrumbs (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute("DELETE FROM breadcrumbs WHERE key = ?1", params![key])?;
        Ok(())
    }
}

/// Open the store described by an optional path.
pub fn open_store(path: Option<&Path>) -> Result<SharedStore> {
    match path {
        Some(p) => Ok(Arc::new(SqliteStore::open(p)?)),
        None => Ok(MemoryStore::shared()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn SessionStore) {
        assert_eq!(store.get(CURRENT_JOB_KEY).unwrap(), None);
        store.set(CURRENT_JOB_KEY, "job-1").unwrap();
        assert_eq!(store.get(CURRENT_JOB_KEY).unwrap().as_deref(), Some("job-1"));
        store.set(CURRENT_JOB_KEY, "job-2").unwrap();
        assert_eq!(store.get(CURRENT_JOB_KEY).unwrap().as_deref(), Some("job-2"));
        store.remove(CURRENT_JOB_KEY).unwrap();
        assert_eq!(store.get(CURRENT_JOB_KEY).unwrap(), None);
        // removing a missing key is not an error
        store.remove(CURRENT_JOB_KEY).unwrap();
    }

    #[test]
    fn memory_store_get_set_remove() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn sqlite_store_get_set_remove() {
        exercise(&SqliteStore::in_memory().unwrap());
    }

    #[test]
    fn sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crumbs.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.set(ACTIVE_CHAT_KEY, "chat-7").unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get(ACTIVE_CHAT_KEY).unwrap().as_deref(), Some("chat-7"));
    }

    #[test]
    fn open_store_without_path_is_memory() {
        let store = open_store(None).unwrap();
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }
}
