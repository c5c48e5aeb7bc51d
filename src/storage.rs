//! Durable key-value slots backing client-side state.
//!
//! The history store only ever needs three primitives, so the capability is a
//! trait: tests bind it to memory, the CLI binds it to a small SQLite file.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(#[from] rusqlite::Error),
    #[error("creating storage directory {path}: {source}")]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("storage quota exceeded ({size} bytes > {limit} bytes)")]
    QuotaExceeded { size: usize, limit: usize },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Byte-oriented slot storage.
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;
    fn delete(&self, key: &str) -> StorageResult<()>;
}

/// In-memory storage with an optional per-value size limit, handy for tests
/// that need to simulate a full quota.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    slots: Mutex<HashMap<String, Vec<u8>>>,
    quota: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(limit: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            quota: Some(limit),
        }
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.slots.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        if let Some(limit) = self.quota {
            if value.len() > limit {
                return Err(StorageError::QuotaExceeded {
                    size: value.len(),
                    limit,
                });
            }
        }
        self.slots.lock().insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.slots.lock().remove(key);
        Ok(())
    }
}

/// SQLite-backed slots. A single `kv` table keyed by slot name.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Opens (and if necessary creates) the database and its table. WAL mode
    /// keeps a concurrent reader from blocking the writer.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StorageError::Directory {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KeyValueStorage for SqliteStorage {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.conn.lock().execute(
            r#"
            INSERT INTO kv (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.conn
            .lock()
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_storage_round_trip() {
        let storage = MemoryStorage::new();
        assert!(storage.get("k").unwrap().is_none());
        storage.set("k", b"v1").unwrap();
        storage.set("k", b"v2").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some(&b"v2"[..]));
        storage.delete("k").unwrap();
        assert!(storage.get("k").unwrap().is_none());
    }

    #[test]
    fn memory_storage_enforces_quota() {
        let storage = MemoryStorage::with_quota(4);
        storage.set("k", b"tiny").unwrap();
        let err = storage.set("k", b"too large").unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { limit: 4, .. }));
        assert_eq!(storage.get("k").unwrap().as_deref(), Some(&b"tiny"[..]));
    }

    #[test]
    fn sqlite_storage_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("history.db");
        {
            let storage = SqliteStorage::open(&path).unwrap();
            storage.set("slot", b"[1,2,3]").unwrap();
            storage.set("slot", b"[4]").unwrap();
        }
        let storage = SqliteStorage::open(&path).unwrap();
        assert_eq!(storage.get("slot").unwrap().as_deref(), Some(&b"[4]"[..]));
        storage.delete("slot").unwrap();
        storage.delete("slot").unwrap();
        assert!(storage.get("slot").unwrap().is_none());
    }
}
