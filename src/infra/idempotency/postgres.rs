//! PostgreSQL-backed idempotency store.
//!
//! One row per key. A row with a NULL `response` is a pending claim.
//! Expiry is evaluated against the database clock so that every instance
//! sharing the table agrees on it.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use crate::domain::{AppError, DatabaseError, IdempotencyStore};

pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    /// Share an existing pool; the table comes from the regular migrations.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT response
            FROM idempotency_keys
            WHERE key = $1 AND response IS NOT NULL AND expires_at > now()
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(row.map(|row| row.get::<Vec<u8>, _>("response")))
    }

    #[instrument(skip(self))]
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool, AppError> {
        // Inserts a pending row, or takes over an expired one. A live row
        // makes the WHERE clause false and nothing is written.
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, response, expires_at)
            VALUES ($1, NULL, now() + make_interval(secs => $2))
            ON CONFLICT (key) DO UPDATE
                SET response = NULL, expires_at = EXCLUDED.expires_at
                WHERE idempotency_keys.expires_at <= now()
            "#,
        )
        .bind(key)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, value), fields(bytes = value.len()))]
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, response, expires_at)
            VALUES ($1, $2, now() + make_interval(secs => $3))
            ON CONFLICT (key) DO UPDATE
                SET response = EXCLUDED.response, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn renew(&self, key: &str, ttl: Duration) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET expires_at = now() + make_interval(secs => $2)
            WHERE key = $1 AND response IS NULL AND expires_at > now()
            "#,
        )
        .bind(key)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, value), fields(bytes = value.len()))]
    async fn discard(&self, key: &str, value: &[u8]) -> Result<bool, AppError> {
        let result =
            sqlx::query("DELETE FROM idempotency_keys WHERE key = $1 AND response = $2")
                .bind(key)
                .bind(value)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn release(&self, key: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM idempotency_keys WHERE key = $1 AND response IS NULL")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn purge_expired(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= now()")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }
}
