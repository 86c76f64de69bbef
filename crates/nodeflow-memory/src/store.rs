use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::KeyValueStore;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );";

/// SQLite-backed key/value store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                NodeflowError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| NodeflowError::Database(e.to_string()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| NodeflowError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| NodeflowError::Database(e.to_string()))?;

        debug!(path = %path.display(), "SQLite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| NodeflowError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| NodeflowError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// List stored keys starting with `prefix`.
    pub fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| NodeflowError::Database(e.to_string()))?;
        let mut stmt = conn
            .prepare("SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")
            .map_err(|e| NodeflowError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![prefix], |row| row.get::<_, String>(0))
            .map_err(|e| NodeflowError::Database(e.to_string()))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row.map_err(|e| NodeflowError::Database(e.to_string()))?);
        }
        Ok(keys)
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>>> {
        let key = key.to_string();
        Box::pin(async move {
            let conn = self
                .conn
                .lock()
                .map_err(|e| NodeflowError::Database(e.to_string()))?;
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| NodeflowError::Database(e.to_string()))
        })
    }

    fn set(&self, key: &str, value: String) -> BoxFuture<'_, Result<()>> {
        let key = key.to_string();
        Box::pin(async move {
            let conn = self
                .conn
                .lock()
                .map_err(|e| NodeflowError::Database(e.to_string()))?;
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, Utc::now().to_rfc3339()],
            )
            .map_err(|e| NodeflowError::Database(e.to_string()))?;
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<()>> {
        let key = key.to_string();
        Box::pin(async move {
            let conn = self
                .conn
                .lock()
                .map_err(|e| NodeflowError::Database(e.to_string()))?;
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map_err(|e| NodeflowError::Database(e.to_string()))?;
            Ok(())
        })
    }
}

/// Process-local key/value store.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|e| NodeflowError::Database(e.to_string()))
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>>> {
        let result = self.lock().map(|m| m.get(key).cloned());
        Box::pin(async move { result })
    }

    fn set(&self, key: &str, value: String) -> BoxFuture<'_, Result<()>> {
        let result = self.lock().map(|mut m| {
            m.insert(key.to_string(), value);
        });
        Box::pin(async move { result })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<()>> {
        let result = self.lock().map(|mut m| {
            m.remove(key);
        });
        Box::pin(async move { result })
    }
}
