// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Durable key-value storage for cache entries and queued actions.
//!
//! Values live in namespaces; keys inside a namespace are scanned in
//! lexicographic order. [`Store::apply`] commits a batch atomically, which is
//! what the queue relies on to persist an action together with its id counter
//! and what the cache relies on to drop a whole version at once.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};

/// SQL schema for the key-value store.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    ns TEXT NOT NULL,
    key TEXT NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (ns, key)
);
"#;

/// A single mutation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Put {
        ns: String,
        key: String,
        value: Vec<u8>,
    },
    Delete {
        ns: String,
        key: String,
    },
    /// Remove every key in the namespace.
    DropNamespace { ns: String },
}

impl StoreOp {
    pub fn put(ns: impl Into<String>, key: impl Into<String>, value: Vec<u8>) -> Self {
        StoreOp::Put {
            ns: ns.into(),
            key: key.into(),
            value,
        }
    }

    pub fn delete(ns: impl Into<String>, key: impl Into<String>) -> Self {
        StoreOp::Delete {
            ns: ns.into(),
            key: key.into(),
        }
    }

    pub fn drop_namespace(ns: impl Into<String>) -> Self {
        StoreOp::DropNamespace { ns: ns.into() }
    }
}

/// Transactional key-value storage collaborator.
pub trait Store: Send + Sync {
    /// Read a single value.
    fn get(&self, ns: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// All entries of a namespace, ordered by key.
    fn scan_ordered(&self, ns: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Apply a batch of mutations atomically. Either all take effect or none do.
    fn apply(&self, ops: Vec<StoreOp>) -> Result<()>;

    fn put(&self, ns: &str, key: &str, value: Vec<u8>) -> Result<()> {
        self.apply(vec![StoreOp::put(ns, key, value)])
    }

    fn delete(&self, ns: &str, key: &str) -> Result<()> {
        self.apply(vec![StoreOp::delete(ns, key)])
    }
}

/// SQLite-backed durable store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    ///
    /// Returns [`Error::StorageCorrupt`] if the file exists but is not a
    /// readable database or fails SQLite's integrity check.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).map_err(classify_sqlite)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(classify_sqlite)?;

        let check: String = conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(classify_sqlite)?;
        if check != "ok" {
            return Err(Error::StorageCorrupt(format!(
                "{}: integrity check failed: {check}",
                path.display()
            )));
        }

        conn.execute_batch(SCHEMA).map_err(classify_sqlite)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::StorageCorrupt("store lock poisoned".to_string()))
    }
}

/// Map file-level SQLite failures to [`Error::StorageCorrupt`].
fn classify_sqlite(err: rusqlite::Error) -> Error {
    match err.sqlite_error_code() {
        Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt) => {
            Error::StorageCorrupt(err.to_string())
        }
        _ => Error::Database(err),
    }
}

impl Store for SqliteStore {
    fn get(&self, ns: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE ns = ?1 AND key = ?2",
                params![ns, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn scan_ordered(&self, ns: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM kv WHERE ns = ?1 ORDER BY key")?;
        let rows = stmt
            .query_map(params![ns], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn apply(&self, ops: Vec<StoreOp>) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for op in ops {
            match op {
                StoreOp::Put { ns, key, value } => {
                    tx.execute(
                        "INSERT INTO kv (ns, key, value) VALUES (?1, ?2, ?3)
                         ON CONFLICT(ns, key) DO UPDATE SET value = excluded.value",
                        params![ns, key, value],
                    )?;
                }
                StoreOp::Delete { ns, key } => {
                    tx.execute("DELETE FROM kv WHERE ns = ?1 AND key = ?2", params![ns, key])?;
                }
                StoreOp::DropNamespace { ns } => {
                    tx.execute("DELETE FROM kv WHERE ns = ?1", params![ns])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

/// Volatile store used when durable storage is unavailable, and in tests.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, ns: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let data = self
            .data
            .lock()
            .map_err(|_| Error::StorageCorrupt("store lock poisoned".to_string()))?;
        Ok(data.get(ns).and_then(|entries| entries.get(key)).cloned())
    }

    fn scan_ordered(&self, ns: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let data = self
            .data
            .lock()
            .map_err(|_| Error::StorageCorrupt("store lock poisoned".to_string()))?;
        Ok(data
            .get(ns)
            .map(|entries| entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn apply(&self, ops: Vec<StoreOp>) -> Result<()> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| Error::StorageCorrupt("store lock poisoned".to_string()))?;
        for op in ops {
            match op {
                StoreOp::Put { ns, key, value } => {
                    data.entry(ns).or_default().insert(key, value);
                }
                StoreOp::Delete { ns, key } => {
                    if let Some(entries) = data.get_mut(&ns) {
                        entries.remove(&key);
                    }
                }
                StoreOp::DropNamespace { ns } => {
                    data.remove(&ns);
                }
            }
        }
        Ok(())
    }
}

/// Open the durable store, degrading to memory-only operation if it is corrupt.
///
/// Other errors (permissions, missing directories that cannot be created) are
/// returned to the caller.
pub fn open_store(path: &Path) -> Result<Arc<dyn Store>> {
    match SqliteStore::open(path) {
        Ok(store) => Ok(Arc::new(store)),
        Err(Error::StorageCorrupt(reason)) => {
            tracing::error!(
                path = %path.display(),
                %reason,
                "durable store is unreadable, continuing in memory-only mode; queued actions will not survive a restart"
            );
            Ok(Arc::new(MemoryStore::new()))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
