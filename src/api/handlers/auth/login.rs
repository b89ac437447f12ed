//! Password login.

use axum::{
    extract::{ConnectInfo, Extension},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::{net::SocketAddr, sync::Arc};
use tracing::error;

use super::types::{ErrorResponse, LoginRequest, LoginResponse, MfaRequiredResponse, STATUS_MFA_REQUIRED};
use super::utils::{extract_client_ip, token_cookie, ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME};
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::auth::login::{LoginAttempt, LoginOutcome};
use crate::auth::token::IssuedTokens;
use crate::config::AdmissionConfig;
use crate::identity::Principal;

/// Cookies for a freshly minted pair.
pub(super) fn token_cookies(config: &AdmissionConfig, tokens: &IssuedTokens) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let cookies = [
        (ACCESS_COOKIE_NAME, &tokens.access_token, config.access_ttl()),
        (REFRESH_COOKIE_NAME, &tokens.refresh_token, config.refresh_ttl()),
    ];
    for (name, token, ttl) in cookies {
        match token_cookie(config, name, token, ttl) {
            Ok(cookie) => {
                headers.append(SET_COOKIE, cookie);
            }
            Err(err) => error!("Failed to build {name} cookie: {err}"),
        }
    }
    headers
}

pub(super) fn authenticated_response(
    config: &AdmissionConfig,
    principal: &Principal,
    tokens: &IssuedTokens,
) -> Response {
    (
        StatusCode::OK,
        token_cookies(config, tokens),
        Json(LoginResponse::new(principal, tokens)),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Tokens issued, or MFA challenge started", body = LoginResponse),
        (status = 400, description = "Missing or malformed fields", body = ErrorResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Account locked or license invalid", body = ErrorResponse),
        (status = 429, description = "Too many attempts from this address", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<LoginRequest>>,
) -> Response {
    let request: LoginRequest = payload.map(|Json(request)| request).unwrap_or_default();
    let ip = extract_client_ip(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        state.config.trusted_proxies(),
    );

    let attempt = LoginAttempt {
        identifier: request.username.as_deref().unwrap_or_default(),
        login_type: request.login_type.as_deref(),
        password: request.password.as_deref().unwrap_or_default(),
        captcha: request.captcha.as_deref(),
        otp: request.otp.as_deref(),
        ip: &ip,
    };

    match state.login.login(attempt).await {
        Ok(LoginOutcome::Authenticated { principal, tokens }) => {
            authenticated_response(&state.config, &principal, &tokens)
        }
        Ok(LoginOutcome::MfaRequired { email_masked }) => (
            StatusCode::OK,
            Json(MfaRequiredResponse {
                status: STATUS_MFA_REQUIRED.to_string(),
                message: "A verification code was sent to your email".to_string(),
                email_masked,
            }),
        )
            .into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}
