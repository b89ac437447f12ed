use axum::{
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::{net::SocketAddr, sync::Arc};

use super::login::token_cookies;
use super::types::{ErrorResponse, RefreshRequest, RefreshResponse};
use super::utils::{cookie_value, extract_client_ip, REFRESH_COOKIE_NAME};
use crate::api::error::ApiError;
use crate::api::state::AppState;

const REFRESH_SCOPE: &str = "refresh";

#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token pair rotated", body = RefreshResponse),
        (status = 400, description = "No refresh token presented", body = ErrorResponse),
        (status = 401, description = "Refresh token invalid, spent or revoked", body = ErrorResponse),
        (status = 426, description = "Token version below the supported floor", body = ErrorResponse),
        (status = 429, description = "Too many refreshes from this address", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<RefreshRequest>>,
) -> Response {
    let ip = extract_client_ip(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        state.config.trusted_proxies(),
    );
    if let Err(err) = state
        .login
        .abuse()
        .charge(REFRESH_SCOPE, &ip, state.config.refresh_ip_limit())
        .await
    {
        return ApiError::from(err).into_response();
    }

    let token = payload
        .and_then(|Json(request)| request.refresh_token)
        .filter(|token| !token.trim().is_empty())
        .or_else(|| cookie_value(&headers, REFRESH_COOKIE_NAME));
    let Some(token) = token else {
        return ApiError::InvalidInput("Missing refresh token".to_string()).into_response();
    };

    match state.refresh.rotate(token.trim()).await {
        Ok(tokens) => (
            StatusCode::OK,
            token_cookies(&state.config, &tokens),
            Json(RefreshResponse::from(&tokens)),
        )
            .into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}
