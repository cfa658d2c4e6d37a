//! Remote backend: `PostgreSQL` shared by every instance of the service.
//!
//! Each instance still runs its own reaper and keeps its own per-key locks;
//! the database only provides row-level atomicity.

use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::time::Duration;
use tracing::{info_span, Instrument};

use super::{BoxFuture, KeyValueBackend, StorageError, TABLE_NAME};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Connect and make sure the records table exists.
    ///
    /// # Errors
    /// Returns `StorageError::Unavailable` if the database cannot be reached or the schema cannot be created.
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(dsn)
            .await
            .map_err(|err| StorageError::Unavailable(err.to_string()))?;

        let backend = Self::from_pool(pool);
        backend
            .ensure_schema()
            .await
            .map_err(|err| StorageError::Unavailable(err.to_string()))?;
        Ok(backend)
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the records table if missing.
    ///
    /// # Errors
    /// Returns an error if the DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        let query = format!(
            "CREATE TABLE IF NOT EXISTS {TABLE_NAME} (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "CREATE"
        );
        sqlx::query(&query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| StorageError::operation("CREATE", err))?;
        Ok(())
    }
}

impl KeyValueBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StorageError>> {
        Box::pin(async move {
            let query = format!("SELECT value FROM {TABLE_NAME} WHERE key = $1");
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT"
            );
            let row = sqlx::query(&query)
                .bind(key)
                .fetch_optional(&self.pool)
                .instrument(span)
                .await
                .map_err(|err| StorageError::operation("SELECT", err))?;
            Ok(row.map(|row| row.get::<String, _>("value")))
        })
    }

    fn put<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let query = format!(
                "INSERT INTO {TABLE_NAME} (key, value, updated_at) VALUES ($1, $2, NOW())
                 ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()"
            );
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT"
            );
            sqlx::query(&query)
                .bind(key)
                .bind(value)
                .execute(&self.pool)
                .instrument(span)
                .await
                .map_err(|err| StorageError::operation("INSERT", err))?;
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let query = format!("DELETE FROM {TABLE_NAME} WHERE key = $1");
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "DELETE"
            );
            sqlx::query(&query)
                .bind(key)
                .execute(&self.pool)
                .instrument(span)
                .await
                .map_err(|err| StorageError::operation("DELETE", err))?;
            Ok(())
        })
    }

    fn scan<'a>(
        &'a self,
        after: Option<&'a str>,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<(String, String)>, StorageError>> {
        Box::pin(async move {
            let query = format!(
                "SELECT key, value FROM {TABLE_NAME}
                 WHERE $1::text IS NULL OR key > $1
                 ORDER BY key ASC
                 LIMIT $2"
            );
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT"
            );
            let rows = sqlx::query(&query)
                .bind(after)
                .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                .fetch_all(&self.pool)
                .instrument(span)
                .await
                .map_err(|err| StorageError::operation("SELECT", err))?;
            Ok(rows
                .into_iter()
                .map(|row| (row.get::<String, _>("key"), row.get::<String, _>("value")))
                .collect())
        })
    }

    fn remove_unchanged<'a>(
        &'a self,
        entries: &'a [(String, String)],
    ) -> BoxFuture<'a, Result<usize, StorageError>> {
        Box::pin(async move {
            if entries.is_empty() {
                return Ok(0);
            }
            let (keys, values): (Vec<&str>, Vec<&str>) = entries
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str()))
                .unzip();
            let query = format!(
                "DELETE FROM {TABLE_NAME} AS t
                 USING UNNEST($1::text[], $2::text[]) AS stale(key, value)
                 WHERE t.key = stale.key AND t.value = stale.value"
            );
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "DELETE"
            );
            let result = sqlx::query(&query)
                .bind(&keys)
                .bind(&values)
                .execute(&self.pool)
                .instrument(span)
                .await
                .map_err(|err| StorageError::operation("DELETE", err))?;
            Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_DSN_ENV: &str = "INTRUDER_TEST_POSTGRES_DSN";

    async fn test_backend() -> anyhow::Result<Option<PostgresBackend>> {
        let Ok(dsn) = std::env::var(TEST_DSN_ENV) else {
            eprintln!("Skipping integration test: {TEST_DSN_ENV} not set");
            return Ok(None);
        };
        let backend = PostgresBackend::connect(&dsn, 2).await?;
        sqlx::query(&format!("TRUNCATE {TABLE_NAME}"))
            .execute(&backend.pool)
            .await?;
        Ok(Some(backend))
    }

    #[tokio::test]
    async fn postgres_round_trip() -> anyhow::Result<()> {
        let Some(backend) = test_backend().await? else {
            return Ok(());
        };

        backend.put("user:a", "1").await?;
        backend.put("user:a", "2").await?;
        backend.put("user:b", "3").await?;
        assert_eq!(backend.get("user:a").await?, Some("2".to_string()));

        let page = backend.scan(Some("user:a"), 10).await?;
        assert_eq!(page, vec![("user:b".to_string(), "3".to_string())]);

        backend.put("user:b", "4").await?;
        let removed = backend
            .remove_unchanged(&[
                ("user:a".to_string(), "2".to_string()),
                ("user:b".to_string(), "3".to_string()),
            ])
            .await?;
        assert_eq!(removed, 1);
        assert_eq!(
            backend.scan(None, 10).await?,
            vec![("user:b".to_string(), "4".to_string())]
        );
        Ok(())
    }
}
