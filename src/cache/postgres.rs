//! Postgres-backed ephemeral store.
//!
//! One row per key in `ephemeral_entries`. Increments are a single
//! `INSERT .. ON CONFLICT .. RETURNING` statement so the row lock serializes
//! concurrent callers across service instances. Expired rows are treated as
//! absent and swept by [`PgEphemeralStore::purge_expired`].

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info_span, Instrument};

use super::{ttl_seconds, EphemeralStore, StoreError, TtlPolicy};
use crate::clock::Clock;

pub struct PgEphemeralStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgEphemeralStore {
    #[must_use]
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Delete rows whose expiry has passed. Returns the number removed.
    ///
    /// # Errors
    /// Returns an error if the delete statement fails.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let query = "DELETE FROM ephemeral_entries WHERE expires_at <= $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE"
        );
        let result = sqlx::query(query)
            .bind(self.clock.now())
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl EphemeralStore for PgEphemeralStore {
    async fn increment(
        &self,
        key: &str,
        ttl: Duration,
        policy: TtlPolicy,
    ) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let expires_at = now.saturating_add(ttl_seconds(ttl));
        let query = match policy {
            TtlPolicy::FixedFromFirst => {
                r"
                INSERT INTO ephemeral_entries (key, value, counter, expires_at)
                VALUES ($1, '1', 1, $2)
                ON CONFLICT (key) DO UPDATE SET
                    counter = CASE WHEN ephemeral_entries.expires_at <= $3
                        THEN 1 ELSE ephemeral_entries.counter + 1 END,
                    expires_at = CASE WHEN ephemeral_entries.expires_at <= $3
                        THEN EXCLUDED.expires_at ELSE ephemeral_entries.expires_at END,
                    value = (CASE WHEN ephemeral_entries.expires_at <= $3
                        THEN 1 ELSE ephemeral_entries.counter + 1 END)::text
                RETURNING counter
                "
            }
            TtlPolicy::SlideOnWrite => {
                r"
                INSERT INTO ephemeral_entries (key, value, counter, expires_at)
                VALUES ($1, '1', 1, $2)
                ON CONFLICT (key) DO UPDATE SET
                    counter = CASE WHEN ephemeral_entries.expires_at <= $3
                        THEN 1 ELSE ephemeral_entries.counter + 1 END,
                    expires_at = EXCLUDED.expires_at,
                    value = (CASE WHEN ephemeral_entries.expires_at <= $3
                        THEN 1 ELSE ephemeral_entries.counter + 1 END)::text
                RETURNING counter
                "
            }
        };
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPSERT"
        );
        let row = sqlx::query(query)
            .bind(key)
            .bind(expires_at)
            .bind(now)
            .fetch_one(&self.pool)
            .instrument(span)
            .await?;
        let counter: i64 = row.get("counter");
        Ok(u64::try_from(counter).unwrap_or(0))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let query = "SELECT value FROM ephemeral_entries WHERE key = $1 AND expires_at > $2";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .bind(key)
            .bind(self.clock.now())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.map(|row| row.get("value")))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = self.clock.now().saturating_add(ttl_seconds(ttl));
        let query = r"
            INSERT INTO ephemeral_entries (key, value, counter, expires_at)
            VALUES ($1, $2, 0, $3)
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                counter = 0,
                expires_at = EXCLUDED.expires_at
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPSERT"
        );
        sqlx::query(query)
            .bind(key)
            .bind(value)
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let query = "DELETE FROM ephemeral_entries WHERE key = $1 RETURNING value, expires_at";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE"
        );
        let row = sqlx::query(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        let now = self.clock.now();
        Ok(row.and_then(|row| {
            let expires_at: i64 = row.get("expires_at");
            (expires_at > now).then(|| row.get("value"))
        }))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let query = "DELETE FROM ephemeral_entries WHERE key = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE"
        );
        sqlx::query(query)
            .bind(key)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }
}
