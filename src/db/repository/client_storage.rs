use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};

// ============================================================================
// Client Storage
// ============================================================================

/// Durable key/value storage on the client side.
///
/// Values are opaque strings (JSON in practice); callers own the encoding.
#[async_trait]
pub trait ClientStorage: Send + Sync + 'static {
    async fn read(&self, key: &str) -> AppResult<Option<String>>;
    async fn write(&self, key: &str, value: &str) -> AppResult<()>;
}

/// SQLite-backed storage using the `client_storage` table.
#[derive(Clone)]
pub struct SqliteClientStorage {
    pool: SqlitePool,
}

impl SqliteClientStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClientStorage for SqliteClientStorage {
    async fn read(&self, key: &str) -> AppResult<Option<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT value
            FROM client_storage
            WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)
    }

    async fn write(&self, key: &str, value: &str) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            INSERT INTO client_storage (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }
}

/// Process-local storage, for embedding without a database and for tests.
#[derive(Default)]
pub struct InMemoryClientStorage {
    values: RwLock<HashMap<String, String>>,
}

impl InMemoryClientStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientStorage for InMemoryClientStorage {
    async fn read(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> AppResult<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
