//! Session endpoints: logout, validity check, consent.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::types::{
    ConsentRequest, ConsentResponse, ErrorResponse, LogoutRequest, StatusResponse, UserSummary,
    VerifyResponse, STATUS_SUCCESS,
};
use super::utils::{
    clear_cookie, cookie_value, extract_access_token, ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME,
};
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::auth::session::SpentToken;
use crate::auth::token::{TokenPayload, VerifyMode};
use crate::tenant::AuthContext;

async fn end_session(state: &AppState, payload: &TokenPayload) {
    let Some(session_id) = payload.session_id() else {
        return;
    };
    match state
        .sessions
        .end_session(payload.principal_id(), session_id)
        .await
    {
        Ok(true) => info!(user_id = payload.principal_id(), "session ended"),
        Ok(false) => debug!(user_id = payload.principal_id(), "session already replaced"),
        Err(err) => error!("Failed to clear session record: {err}"),
    }
}

async fn retire_refresh_token(state: &AppState, token: &str) {
    let payload = match state.verifier.verify(token, VerifyMode::Refresh).await {
        Ok(payload) => payload,
        Err(err) => {
            debug!("logout with unusable refresh token: {err}");
            return;
        }
    };
    let remaining = payload.expires_at.saturating_sub(state.clock.now()).max(1);
    let ttl = Duration::from_secs(u64::try_from(remaining).unwrap_or(1));
    if let Err(err) = state
        .sessions
        .blacklist(token, &SpentToken::LoggedOut, ttl)
        .await
    {
        error!("Failed to blacklist refresh token on logout: {err}");
    }
    end_session(state, &payload).await;
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Session cleared (also when there was none)", body = StatusResponse)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<LogoutRequest>>,
) -> Response {
    let refresh_token = payload
        .and_then(|Json(request)| request.refresh_token)
        .filter(|token| !token.trim().is_empty())
        .or_else(|| cookie_value(&headers, REFRESH_COOKIE_NAME));
    if let Some(token) = refresh_token {
        retire_refresh_token(&state, token.trim()).await;
    }

    if let Some(token) = extract_access_token(&headers) {
        if let Ok(payload) = state.verifier.verify(&token, VerifyMode::Access).await {
            end_session(&state, &payload).await;
        }
    }

    // Always clear the cookies, even if nothing was recorded server-side.
    let mut response_headers = HeaderMap::new();
    for name in [ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME] {
        if let Ok(cookie) = clear_cookie(&state.config, name) {
            response_headers.append(SET_COOKIE, cookie);
        }
    }
    (
        StatusCode::OK,
        response_headers,
        Json(StatusResponse::success("Logged out")),
    )
        .into_response()
}

#[utoipa::path(
    get,
    path = "/auth/verify",
    responses(
        (status = 200, description = "Token is valid", body = VerifyResponse),
        (status = 401, description = "Token invalid, session expired or invalidated", body = ErrorResponse),
        (status = 426, description = "Token version below the supported floor", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn verify(context: Extension<AuthContext>) -> Response {
    (
        StatusCode::OK,
        Json(VerifyResponse {
            status: STATUS_SUCCESS.to_string(),
            user: UserSummary::from(&context.principal),
            tenant_id: context.tenant_id.map(|tenant| tenant.0),
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/auth/consent",
    request_body = ConsentRequest,
    responses(
        (status = 200, description = "Consent recorded", body = ConsentResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn consent(
    state: Extension<Arc<AppState>>,
    context: Extension<AuthContext>,
    payload: Option<Json<ConsentRequest>>,
) -> Response {
    let accepted = payload
        .and_then(|Json(request)| request.accepted)
        .unwrap_or(true);
    match state
        .principals
        .set_consent(context.principal.id, accepted)
        .await
    {
        Ok(()) => {
            info!(user_id = context.principal.id, accepted, "consent updated");
            (
                StatusCode::OK,
                Json(ConsentResponse {
                    status: STATUS_SUCCESS.to_string(),
                    consent_accepted: accepted,
                }),
            )
                .into_response()
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}
