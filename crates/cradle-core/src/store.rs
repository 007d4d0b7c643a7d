use crate::error::SyncError;
use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Synchronous local key-value persistence shared by the tracker and the
/// sync queue. Values are UTF-8 strings (serialized JSON); the store is
/// local to one device and non-transactional.
pub trait DurableStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SyncError>;
    fn remove(&self, key: &str) -> Result<(), SyncError>;
}

/// In-memory store used in tests and as the degraded mode when no durable
/// backend is available.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| SyncError::StorageUnavailable(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| SyncError::StorageUnavailable(e.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| SyncError::StorageUnavailable(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

/// SQLite-backed store, one kv table. This is the production backend on
/// desktop/mobile shells where the app has a filesystem.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open the database at the given path and initialize the table if needed
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create db directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl DurableStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SyncError::StorageUnavailable(e.to_string()))?;
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SyncError::StorageUnavailable(e.to_string()))?;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SyncError::StorageUnavailable(e.to_string()))?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}
