//! SQLite storage backend
//!
//! Payloads live in a single `module_payloads` table keyed by module id.

use super::{validate_key, StorageBackend, StorageError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};

/// Storage backed by a SQLite database
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if missing) the database at `db_path` and run migrations
    ///
    /// Accepts either a plain path or a `sqlite:` connection string.
    /// `sqlite::memory:` gives a private in-memory database.
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file, or a connection string
    ///
    /// # Returns
    /// * `Ok(SqliteStorage)` once connected and migrated
    /// * `Err(StorageError)` if the directory, connection or migration failed
    pub async fn connect(db_path: &str) -> Result<Self, StorageError> {
        let in_memory = db_path.contains(":memory:");

        // Ensure parent directory exists
        if !in_memory && !db_path.starts_with("sqlite:") {
            if let Some(parent) = PathBuf::from(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }

        // SQLite connection string format: sqlite:path/to/db.db
        let connection_string = if db_path.starts_with("sqlite:") {
            db_path.to_string()
        } else {
            format!("sqlite:{}", db_path)
        };

        let options = SqliteConnectOptions::from_str(&connection_string)?.create_if_missing(true);

        // Every in-memory connection is its own database, so keep exactly one alive.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(options).await?;

        info!("Connected to SQLite payload store at: {}", db_path);

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        let migration_sql = include_str!("../../migrations/001_create_module_payloads.sql");

        let mut cleaned_sql = String::new();
        for line in migration_sql.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("--") {
                continue;
            }
            let without_comments = match trimmed.find("--") {
                Some(pos) => &trimmed[..pos],
                None => trimmed,
            };
            cleaned_sql.push_str(without_comments.trim());
            cleaned_sql.push(' ');
        }

        for statement in cleaned_sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        debug!("Payload store migrations completed");
        Ok(())
    }

    /// When the payload under `key` was last written, if there is one
    pub async fn updated_at(&self, key: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        validate_key(key)?;
        let updated_at = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT updated_at FROM module_payloads WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(updated_at)
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl StorageBackend for SqliteStorage {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM module_payloads WHERE key = ?")
                .bind(key)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_key(key)?;
        let payload =
            sqlx::query_scalar::<_, Vec<u8>>("SELECT payload FROM module_payloads WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(payload)
    }

    async fn write(&self, key: &str, payload: &[u8]) -> Result<(), StorageError> {
        validate_key(key)?;
        let updated_at = Utc::now();
        sqlx::query(
            "INSERT INTO module_payloads (key, payload, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(payload)
        .bind(updated_at)
        .execute(&self.pool)
        .await?;

        debug!(key = %key, bytes = payload.len(), "Stored payload row");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        let result = sqlx::query("DELETE FROM module_payloads WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
