use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;

use super::types::{ErrorResponse, VersionResponse, STATUS_SUCCESS};
use crate::api::error::ApiError;
use crate::api::state::AppState;

#[utoipa::path(
    get,
    path = "/auth/version",
    responses(
        (status = 200, description = "Current and minimum supported product versions", body = VersionResponse),
        (status = 500, description = "Version record unavailable", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn version(state: Extension<Arc<AppState>>) -> Response {
    match state.versions.current().await {
        Ok(info) => (
            StatusCode::OK,
            Json(VersionResponse {
                status: STATUS_SUCCESS.to_string(),
                current_version: info.latest().to_string(),
                min_supported_version: info.min_supported().to_string(),
            }),
        )
            .into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}
