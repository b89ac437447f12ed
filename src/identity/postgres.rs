use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{info_span, Instrument};

use super::{Principal, PrincipalStore, TenantId};
use crate::cache::StoreError;

const PRINCIPAL_COLUMNS: &str = "id, username, first_name, last_name, email, password_verifier, \
     is_active, tenant_id, license_key, consent_accepted, password_changed_at";

pub struct PgPrincipalStore {
    pool: PgPool,
}

impl PgPrincipalStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where<T>(
        &self,
        predicate: &str,
        value: T,
    ) -> Result<Option<Principal>, StoreError>
    where
        T: for<'q> sqlx::Encode<'q, sqlx::Postgres> + sqlx::Type<sqlx::Postgres> + Send + 'static,
    {
        let query = format!("SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE {predicate}");
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(principal_from_row))
    }

    async fn execute_update(&self, query: &str, id: i64, flag: bool) -> Result<(), StoreError> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE"
        );
        sqlx::query(query)
            .bind(id)
            .bind(flag)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }
}

fn principal_from_row(row: &PgRow) -> Principal {
    Principal {
        id: row.get("id"),
        username: row.get("username"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
        password_verifier: row.get("password_verifier"),
        is_active: row.get("is_active"),
        tenant_id: row.get::<Option<i64>, _>("tenant_id").map(TenantId),
        license_key: row.get("license_key"),
        consent_accepted: row.get("consent_accepted"),
        password_changed_at: row.get("password_changed_at"),
    }
}

#[async_trait]
impl PrincipalStore for PgPrincipalStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>, StoreError> {
        self.fetch_one_where("lower(username) = lower($1)", username.to_string())
            .await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Principal>, StoreError> {
        self.fetch_one_where("id = $1", id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError> {
        self.fetch_one_where("lower(email) = lower($1)", email.to_string())
            .await
    }

    async fn replace_verifier(
        &self,
        id: i64,
        expected: &str,
        replacement: &str,
    ) -> Result<bool, StoreError> {
        let query = r"
            UPDATE principals
            SET password_verifier = $3
            WHERE id = $1 AND password_verifier = $2
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE"
        );
        let result = sqlx::query(query)
            .bind(id)
            .bind(expected)
            .bind(replacement)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn activate(&self, id: i64) -> Result<(), StoreError> {
        self.execute_update("UPDATE principals SET is_active = $2 WHERE id = $1", id, true)
            .await
    }

    async fn set_consent(&self, id: i64, accepted: bool) -> Result<(), StoreError> {
        self.execute_update(
            "UPDATE principals SET consent_accepted = $2 WHERE id = $1",
            id,
            accepted,
        )
        .await
    }
}
