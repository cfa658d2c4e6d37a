//! Embedded backend: a single `SQLite` file on local disk.
//!
//! `rusqlite` is synchronous, so every statement runs on the blocking pool and
//! the connection is serialized behind a mutex.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info_span};

use super::{BoxFuture, KeyValueBackend, StorageError, TABLE_NAME};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open (or create) the store at `path`.
    ///
    /// # Errors
    /// Returns `StorageError::Unavailable` if the file cannot be opened or the schema cannot be created.
    pub async fn open(path: PathBuf) -> Result<Self, StorageError> {
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path)
                .map_err(|err| StorageError::Unavailable(format!("{}: {err}", path.display())))?;
            Self::init(conn)
        })
        .await
        .map_err(|err| StorageError::Unavailable(err.to_string()))?
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns `StorageError::Unavailable` if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()
            .map_err(|err| StorageError::Unavailable(err.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|err| StorageError::Unavailable(err.to_string()))?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {TABLE_NAME} (
                 key TEXT PRIMARY KEY NOT NULL,
                 value TEXT NOT NULL
             );"
        ))
        .map_err(|err| StorageError::Unavailable(err.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let span = info_span!("db.query", db.system = "sqlite", db.operation = operation);
        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let mut guard = conn
                .lock()
                .map_err(|_| StorageError::operation(operation, "connection mutex poisoned"))?;
            f(&mut *guard).map_err(|err| StorageError::operation(operation, err))
        })
        .await
        .map_err(|err| StorageError::operation(operation, err))?
    }
}

impl KeyValueBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StorageError>> {
        let key = key.to_string();
        Box::pin(self.with_conn("SELECT", move |conn| {
            conn.query_row(
                &format!("SELECT value FROM {TABLE_NAME} WHERE key = ?1"),
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
        }))
    }

    fn put<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        let key = key.to_string();
        let value = value.to_string();
        Box::pin(self.with_conn("UPSERT", move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {TABLE_NAME} (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value"
                ),
                params![key, value],
            )
            .map(|_| ())
        }))
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        let key = key.to_string();
        Box::pin(self.with_conn("DELETE", move |conn| {
            conn.execute(
                &format!("DELETE FROM {TABLE_NAME} WHERE key = ?1"),
                params![key],
            )
            .map(|_| ())
        }))
    }

    fn scan<'a>(
        &'a self,
        after: Option<&'a str>,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<(String, String)>, StorageError>> {
        let after = after.map(ToString::to_string);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Box::pin(self.with_conn("SELECT", move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT key, value FROM {TABLE_NAME}
                 WHERE ?1 IS NULL OR key > ?1
                 ORDER BY key ASC
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![after, limit], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            rows.collect()
        }))
    }

    fn remove_unchanged<'a>(
        &'a self,
        entries: &'a [(String, String)],
    ) -> BoxFuture<'a, Result<usize, StorageError>> {
        let entries = entries.to_vec();
        Box::pin(self.with_conn("DELETE", move |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt = tx.prepare(&format!(
                    "DELETE FROM {TABLE_NAME} WHERE key = ?1 AND value = ?2"
                ))?;
                for (key, value) in &entries {
                    removed += stmt.execute(params![key, value])?;
                }
            }
            tx.commit()?;
            debug!(removed, "sqlite batch delete committed");
            Ok(removed)
        }))
    }
}
