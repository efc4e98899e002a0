//! Shared key-value store used for API key state and the L2 cache.
//!
//! Backends are intentionally dumb: string keys, string values, optional
//! TTL. Any backend failure is treated as "no state available" by callers;
//! nothing in the engine depends on this store being up.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// Minimal key-value contract with TTL semantics.
pub trait KeyValueStore: Send + Sync {
    /// Fetch a value. Expired entries read as `None`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value. `ttl_seconds` of `None` means no expiry.
    fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;
}

/// SQLite-backed store. One table, values as JSON strings.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Store(e.to_string()))?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Store(e.to_string()))?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn initialize(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER
            )",
            [],
        )
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("store lock poisoned: {e}")))?;
        f(&conn).map_err(|e| Error::Store(e.to_string()))
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Utc::now().timestamp();
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM kv_entries
                 WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, now],
                |row| row.get::<_, String>(0),
            )
            .optional()
        })
    }

    fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()> {
        let expires_at = ttl_seconds.map(|ttl| Utc::now().timestamp() + ttl as i64);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = ?2, expires_at = ?3",
                params![key, value, expires_at],
            )?;
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
            Ok(())
        })
    }
}

/// Process-local store, for tests and store-less deployments.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Option<i64>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Utc::now().timestamp();
        let entries = self
            .entries
            .lock()
            .map_err(|e| Error::Internal(format!("store lock poisoned: {e}")))?;
        Ok(entries
            .get(key)
            .filter(|(_, expires)| expires.map(|at| at > now).unwrap_or(true))
            .map(|(value, _)| value.clone()))
    }

    fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()> {
        let expires_at = ttl_seconds.map(|ttl| Utc::now().timestamp() + ttl as i64);
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| Error::Internal(format!("store lock poisoned: {e}")))?;
        entries.insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| Error::Internal(format!("store lock poisoned: {e}")))?;
        entries.remove(key);
        Ok(())
    }
}

/// Open the shared store named by `SHARED_STORE_URL`, when set.
///
/// The variable holds a filesystem path for the SQLite backend. Any failure
/// to open degrades to `None` rather than erroring.
pub fn shared_store_from_env() -> Option<Arc<dyn KeyValueStore>> {
    let url = std::env::var("SHARED_STORE_URL").ok()?;
    let path = url.strip_prefix("sqlite://").unwrap_or(&url);
    match SqliteStore::open(path) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            tracing::warn!(error = %e, "shared store unavailable, using process-local state");
            None
        }
    }
}
