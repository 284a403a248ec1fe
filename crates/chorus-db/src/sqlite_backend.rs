use std::path::Path;

use async_trait::async_trait;
use chorus_common::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::migrations::MIGRATIONS;
use crate::storage::{StorageBackend, normalize_prefix};

/// SQLite-backed storage for session metadata and message history.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening sqlite storage at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub async fn schema_version(&self) -> Result<u32> {
        let conn = self.conn.lock().await;
        conn.query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(|e| Error::Database(format!("failed to read schema version: {e}")))
    }
}

fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| Error::Database(format!("failed to read schema version: {e}")))?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        debug!("applying storage migration v{}", migration.version);
        conn.execute_batch(migration.sql)
            .map_err(|e| Error::Database(format!("migration failed: {e}")))?;
        conn.execute_batch(&format!("PRAGMA user_version = {}", migration.version))
            .map_err(|e| Error::Database(format!("failed to record schema version: {e}")))?;
    }
    Ok(())
}

fn decode(raw: &str) -> Result<Value> {
    serde_json::from_str(raw)
        .map_err(|e| Error::Database(format!("corrupt stored value: {e}")))
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.conn.lock().await;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to read '{key}': {e}")))?;
        raw.as_deref().map(decode).transpose()
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO kv_store (key, value)
             VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               updated_at = datetime('now')",
            params![key, value.to_string()],
        )
        .map_err(|e| Error::Database(format!("failed to write '{key}': {e}")))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let values = conn
            .execute("DELETE FROM kv_store WHERE key = ?1", params![key])
            .map_err(|e| Error::Database(format!("failed to delete '{key}': {e}")))?;
        let items = conn
            .execute("DELETE FROM list_store WHERE key = ?1", params![key])
            .map_err(|e| Error::Database(format!("failed to delete list '{key}': {e}")))?;
        Ok(values + items > 0)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = normalize_prefix(prefix);
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT key FROM kv_store
                 WHERE substr(key, 1, ?2) = ?1
                 ORDER BY key",
            )
            .map_err(|e| Error::Database(format!("failed to prepare key listing: {e}")))?;

        let rows = stmt
            .query_map(params![prefix, prefix.chars().count() as i64], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| Error::Database(format!("failed to list keys: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read key row: {e}")))
    }

    async fn append(&self, key: &str, item: Value) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO list_store (key, position, value)
             SELECT ?1, COALESCE(MAX(position) + 1, 0), ?2
             FROM list_store WHERE key = ?1",
            params![key, item.to_string()],
        )
        .map_err(|e| Error::Database(format!("failed to append to '{key}': {e}")))?;
        Ok(())
    }

    async fn get_range(&self, key: &str, start: usize, end: usize) -> Result<Vec<Value>> {
        if start >= end {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT value FROM list_store
                 WHERE key = ?1
                 ORDER BY position
                 LIMIT ?2 OFFSET ?3",
            )
            .map_err(|e| Error::Database(format!("failed to prepare range query: {e}")))?;

        let rows = stmt
            .query_map(
                params![key, (end - start) as i64, start as i64],
                |row| row.get::<_, String>(0),
            )
            .map_err(|e| Error::Database(format!("failed to read range of '{key}': {e}")))?;

        let mut items = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| Error::Database(format!("failed to read list row: {e}")))?;
            items.push(decode(&raw)?);
        }
        Ok(items)
    }

    async fn get_length(&self, key: &str) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM list_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to count '{key}': {e}")))?;
        Ok(count as usize)
    }
}
