use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{info_span, Instrument};

use super::{TenantError, TenantRecord, TenantTable};
use crate::cache::StoreError;
use crate::identity::TenantId;

const RECORD_COLUMNS: &str = "id, tenant_id, name, data::text AS data";

/// `tenant_records`. Every statement carries `tenant_id = $1`.
pub struct PgRecordTable {
    pool: PgPool,
}

impl PgRecordTable {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &PgRow) -> Result<TenantRecord, TenantError> {
    let raw: String = row.get("data");
    let data = serde_json::from_str(&raw).map_err(|_| StoreError::Malformed {
        key: "tenant_records.data".to_string(),
    })?;
    Ok(TenantRecord {
        id: row.get("id"),
        tenant_id: TenantId(row.get("tenant_id")),
        name: row.get("name"),
        data,
    })
}

fn db_span(operation: &'static str) -> tracing::Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation
    )
}

#[async_trait]
impl TenantTable<TenantRecord> for PgRecordTable {
    async fn find(&self, tenant_id: TenantId, id: i64) -> Result<Option<TenantRecord>, TenantError> {
        let query =
            format!("SELECT {RECORD_COLUMNS} FROM tenant_records WHERE tenant_id = $1 AND id = $2");
        let row = sqlx::query(&query)
            .bind(tenant_id.0)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT"))
            .await
            .map_err(StoreError::from)?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<TenantRecord>, TenantError> {
        let query =
            format!("SELECT {RECORD_COLUMNS} FROM tenant_records WHERE tenant_id = $1 ORDER BY id");
        let rows = sqlx::query(&query)
            .bind(tenant_id.0)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT"))
            .await
            .map_err(StoreError::from)?;
        rows.iter().map(record_from_row).collect()
    }

    async fn insert(&self, tenant_id: TenantId, row: TenantRecord) -> Result<TenantRecord, TenantError> {
        let query = format!(
            "INSERT INTO tenant_records (tenant_id, name, data) VALUES ($1, $2, $3::jsonb) \
             RETURNING {RECORD_COLUMNS}"
        );
        let stored = sqlx::query(&query)
            .bind(tenant_id.0)
            .bind(&row.name)
            .bind(row.data.to_string())
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT"))
            .await
            .map_err(StoreError::from)?;
        record_from_row(&stored)
    }

    async fn update(
        &self,
        tenant_id: TenantId,
        id: i64,
        row: TenantRecord,
    ) -> Result<Option<TenantRecord>, TenantError> {
        let query = format!(
            "UPDATE tenant_records SET name = $3, data = $4::jsonb \
             WHERE tenant_id = $1 AND id = $2 RETURNING {RECORD_COLUMNS}"
        );
        let stored = sqlx::query(&query)
            .bind(tenant_id.0)
            .bind(id)
            .bind(&row.name)
            .bind(row.data.to_string())
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE"))
            .await
            .map_err(StoreError::from)?;
        stored.as_ref().map(record_from_row).transpose()
    }

    async fn delete(&self, tenant_id: TenantId, id: i64) -> Result<bool, TenantError> {
        let result = sqlx::query("DELETE FROM tenant_records WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id.0)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE"))
            .await
            .map_err(StoreError::from)?;
        Ok(result.rows_affected() == 1)
    }
}
