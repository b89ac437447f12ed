use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::{ChallengeStatus, ChallengeStore, MfaChallenge};
use crate::cache::StoreError;

const CHALLENGE_COLUMNS: &str =
    "id, principal_id, email, code_hash, created_at, expires_at, attempts, status";

/// `mfa_challenges` has a unique index on `principal_id`.
pub struct PgChallengeStore {
    pool: PgPool,
}

impl PgChallengeStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn challenge_from_row(row: &PgRow) -> Result<MfaChallenge, StoreError> {
    let attempts: i32 = row.get("attempts");
    let status: String = row.get("status");
    Ok(MfaChallenge {
        id: row.get("id"),
        principal_id: row.get("principal_id"),
        email: row.get("email"),
        code_hash: row.get("code_hash"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        attempts: u32::try_from(attempts).unwrap_or(0),
        status: status.parse()?,
    })
}

#[async_trait]
impl ChallengeStore for PgChallengeStore {
    async fn current(&self, principal_id: i64) -> Result<Option<MfaChallenge>, StoreError> {
        let query = format!("SELECT {CHALLENGE_COLUMNS} FROM mfa_challenges WHERE principal_id = $1");
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(&query)
            .bind(principal_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.as_ref().map(challenge_from_row).transpose()
    }

    async fn replace(&self, challenge: &MfaChallenge) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO mfa_challenges
                (id, principal_id, email, code_hash, created_at, expires_at, attempts, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (principal_id) DO UPDATE SET
                id = EXCLUDED.id,
                email = EXCLUDED.email,
                code_hash = EXCLUDED.code_hash,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at,
                attempts = EXCLUDED.attempts,
                status = EXCLUDED.status
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT"
        );
        sqlx::query(query)
            .bind(challenge.id)
            .bind(challenge.principal_id)
            .bind(&challenge.email)
            .bind(&challenge.code_hash)
            .bind(challenge.created_at)
            .bind(challenge.expires_at)
            .bind(i32::try_from(challenge.attempts).unwrap_or(i32::MAX))
            .bind(challenge.status.as_str())
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        max_attempts: u32,
    ) -> Result<Option<MfaChallenge>, StoreError> {
        let query = format!(
            r"
            UPDATE mfa_challenges
            SET attempts = attempts + 1,
                status = CASE WHEN attempts + 1 >= $2 THEN 'exhausted' ELSE status END
            WHERE id = $1 AND status = 'pending'
            RETURNING {CHALLENGE_COLUMNS}
            "
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(i32::try_from(max_attempts).unwrap_or(i32::MAX))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.as_ref().map(challenge_from_row).transpose()
    }

    async fn claim(&self, id: Uuid) -> Result<bool, StoreError> {
        let query = "DELETE FROM mfa_challenges WHERE id = $1 AND status = 'pending'";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE"
        );
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_expired(&self, id: Uuid) -> Result<(), StoreError> {
        let query = "UPDATE mfa_challenges SET status = $2 WHERE id = $1 AND status = 'pending'";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE"
        );
        sqlx::query(query)
            .bind(id)
            .bind(ChallengeStatus::Expired.as_str())
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }
}
