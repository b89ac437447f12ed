//! Google sign-in.
//!
//! Both endpoints answer with redirects: to the provider on start, and back
//! to the frontend on callback (tokens in the fragment, or `?error=<code>`).

use axum::{
    extract::{Extension, Query},
    http::{header::LOCATION, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::IntoParams;

use super::login::token_cookies;
use crate::api::error::ApiError;
use crate::api::state::AppState;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the provider when the user declined.
    pub error: Option<String>,
}

fn redirect(location: &str, mut headers: HeaderMap) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => {
            headers.insert(LOCATION, value);
            (StatusCode::FOUND, headers).into_response()
        }
        Err(err) => {
            error!("Failed to build redirect location: {err}");
            ApiError::Internal("invalid redirect location".to_string()).into_response()
        }
    }
}

fn frontend(state: &AppState) -> &str {
    state.config.frontend_url().trim_end_matches('/')
}

fn login_error(state: &AppState, code: &str) -> Response {
    redirect(&format!("{}/login?error={code}", frontend(state)), HeaderMap::new())
}

#[utoipa::path(
    get,
    path = "/auth/oauth/google/start",
    responses(
        (status = 302, description = "Redirect to the provider, or back to the login page when sign-in is unavailable")
    ),
    tag = "auth"
)]
pub async fn start(state: Extension<Arc<AppState>>) -> Response {
    if !state.oauth.enabled() {
        return login_error(&state, "oauth_unavailable");
    }
    let nonce = match state.oauth_states.issue().await {
        Ok(nonce) => nonce,
        Err(err) => {
            error!("Failed to store oauth state: {err}");
            return login_error(&state, "internal_error");
        }
    };
    match state.oauth.authorize_url(&nonce) {
        Ok(url) => redirect(&url, HeaderMap::new()),
        Err(err) => {
            error!("Failed to build authorize url: {err:#}");
            login_error(&state, "oauth_unavailable")
        }
    }
}

#[utoipa::path(
    get,
    path = "/auth/oauth/google/callback",
    params(CallbackParams),
    responses(
        (status = 302, description = "Redirect to the frontend with tokens or an error code")
    ),
    tag = "auth"
)]
pub async fn callback(
    state: Extension<Arc<AppState>>,
    params: Option<Query<CallbackParams>>,
) -> Response {
    let params = params.map(|Query(params)| params).unwrap_or_default();
    if let Some(provider_error) = params.error.as_deref() {
        warn!(provider_error, "oauth provider returned an error");
        return login_error(&state, "oauth_denied");
    }

    let nonce = params.state.as_deref().unwrap_or_default();
    match state.oauth_states.consume(nonce).await {
        Ok(true) => {}
        Ok(false) => return login_error(&state, "invalid_state"),
        Err(err) => {
            error!("Failed to consume oauth state: {err}");
            return login_error(&state, "internal_error");
        }
    }

    let Some(code) = params.code.as_deref().filter(|code| !code.is_empty()) else {
        return login_error(&state, "missing_code");
    };
    let identity = match state.oauth.exchange(code).await {
        Ok(identity) => identity,
        Err(err) => {
            warn!("oauth code exchange failed: {err:#}");
            return login_error(&state, "oauth_failed");
        }
    };
    if !identity.email_verified {
        return login_error(&state, "email_unverified");
    }

    match state.login.login_verified_email(&identity.email).await {
        Ok((_principal, tokens)) => {
            let location = format!(
                "{}/oauth/callback#access_token={}&refresh_token={}",
                frontend(&state),
                tokens.access_token,
                tokens.refresh_token
            );
            redirect(&location, token_cookies(&state.config, &tokens))
        }
        Err(err) => {
            let err = ApiError::from(err);
            login_error(&state, err.code())
        }
    }
}
