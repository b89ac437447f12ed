//! Tenant-owned records.
//!
//! Every handler takes a [`TenantScope`] and reaches the table only through
//! [`tenant_aware`]; a row of another tenant is answered with 404.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use super::auth::types::ErrorResponse;
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::tenant::{tenant_aware, ScopedTable, TenantRecord, TenantScope};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RecordInput {
    pub name: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub data: Value,
}

impl RecordInput {
    fn into_record(self) -> Result<TenantRecord, ApiError> {
        if self.name.trim().is_empty() {
            return Err(ApiError::InvalidInput("Missing name".to_string()));
        }
        Ok(TenantRecord {
            id: 0,
            // Replaced with the caller's tenant by the gate.
            tenant_id: crate::identity::TenantId(0),
            name: self.name,
            data: self.data,
        })
    }
}

fn table(state: &AppState, scope: &TenantScope) -> ScopedTable<TenantRecord> {
    tenant_aware(state.records.clone(), scope)
}

fn payload_required() -> Response {
    ApiError::InvalidInput("Missing payload".to_string()).into_response()
}

#[utoipa::path(
    get,
    path = "/resource",
    responses(
        (status = 200, description = "Records of the caller's tenant", body = [TenantRecord]),
        (status = 403, description = "No tenant resolved", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "resource"
)]
pub async fn list(scope: TenantScope, state: Extension<Arc<AppState>>) -> Response {
    match table(&state, &scope).list().await {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/resource",
    request_body = RecordInput,
    responses(
        (status = 201, description = "Record created in the caller's tenant", body = TenantRecord),
        (status = 400, description = "Missing fields", body = ErrorResponse),
        (status = 403, description = "No tenant resolved", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "resource"
)]
pub async fn create(
    scope: TenantScope,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<RecordInput>>,
) -> Response {
    let Some(Json(input)) = payload else {
        return payload_required();
    };
    let record = match input.into_record() {
        Ok(record) => record,
        Err(err) => return err.into_response(),
    };
    match table(&state, &scope).insert(record).await {
        Ok(stored) => {
            info!(tenant_id = %scope.tenant_id, record_id = stored.id, "record created");
            (StatusCode::CREATED, Json(stored)).into_response()
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/resource/{id}",
    params(("id" = i64, Path, description = "Record id")),
    responses(
        (status = 200, description = "The record", body = TenantRecord),
        (status = 404, description = "No such record in the caller's tenant", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "resource"
)]
pub async fn fetch(
    scope: TenantScope,
    state: Extension<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Response {
    match table(&state, &scope).find(id).await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[utoipa::path(
    put,
    path = "/resource/{id}",
    params(("id" = i64, Path, description = "Record id")),
    request_body = RecordInput,
    responses(
        (status = 200, description = "Record updated", body = TenantRecord),
        (status = 404, description = "No such record in the caller's tenant", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "resource"
)]
pub async fn update(
    scope: TenantScope,
    state: Extension<Arc<AppState>>,
    Path(id): Path<i64>,
    payload: Option<Json<RecordInput>>,
) -> Response {
    let Some(Json(input)) = payload else {
        return payload_required();
    };
    let record = match input.into_record() {
        Ok(record) => record,
        Err(err) => return err.into_response(),
    };
    match table(&state, &scope).update(id, record).await {
        Ok(stored) => (StatusCode::OK, Json(stored)).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/resource/{id}",
    params(("id" = i64, Path, description = "Record id")),
    responses(
        (status = 204, description = "Record deleted"),
        (status = 404, description = "No such record in the caller's tenant", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "resource"
)]
pub async fn delete(
    scope: TenantScope,
    state: Extension<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Response {
    match table(&state, &scope).delete(id).await {
        Ok(()) => {
            info!(tenant_id = %scope.tenant_id, record_id = id, "record deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}
