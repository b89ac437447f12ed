//! Second step of a login paused on an emailed code.

use axum::{
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::{net::SocketAddr, sync::Arc};

use super::login::authenticated_response;
use super::types::{
    ErrorResponse, LoginResponse, MfaResendRequest, MfaVerifyRequest, StatusResponse,
    STATUS_SUCCESS,
};
use super::utils::extract_client_ip;
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::auth::login::MfaSubject;
use crate::auth::password::LoginIdentifier;

fn subject(
    username: Option<&str>,
    login_type: Option<&str>,
    email: Option<&str>,
) -> Result<MfaSubject, ApiError> {
    let username = username.map(str::trim).filter(|value| !value.is_empty());
    let email = email.map(str::trim).filter(|value| !value.is_empty());
    match (username, email) {
        (Some(username), _) => Ok(MfaSubject::Identifier(LoginIdentifier::parse(
            username, login_type,
        )?)),
        (None, Some(email)) => Ok(MfaSubject::Email(email.to_string())),
        (None, None) => Err(ApiError::InvalidInput(
            "Missing username or email".to_string(),
        )),
    }
}

#[utoipa::path(
    post,
    path = "/auth/mfa/verify",
    request_body = MfaVerifyRequest,
    responses(
        (status = 200, description = "Code accepted, tokens issued", body = LoginResponse),
        (status = 400, description = "Missing fields", body = ErrorResponse),
        (status = 401, description = "Wrong, expired or exhausted code", body = ErrorResponse),
        (status = 429, description = "Too many attempts from this address", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn verify(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<MfaVerifyRequest>>,
) -> Response {
    let request: MfaVerifyRequest = payload.map(|Json(request)| request).unwrap_or_default();
    let subject = match subject(
        request.username.as_deref(),
        request.login_type.as_deref(),
        request.email.as_deref(),
    ) {
        Ok(subject) => subject,
        Err(err) => return err.into_response(),
    };
    let Some(code) = request
        .code
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty())
    else {
        return ApiError::InvalidInput("Missing code".to_string()).into_response();
    };

    let ip = extract_client_ip(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        state.config.trusted_proxies(),
    );
    match state.login.verify_mfa(&subject, code, &ip).await {
        Ok((principal, tokens)) => authenticated_response(&state.config, &principal, &tokens),
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/auth/mfa/resend",
    request_body = MfaResendRequest,
    responses(
        (status = 200, description = "A new code was sent", body = StatusResponse),
        (status = 400, description = "No verification in progress", body = ErrorResponse),
        (status = 429, description = "The current code is still valid", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn resend(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<MfaResendRequest>>,
) -> Response {
    let request: MfaResendRequest = payload.map(|Json(request)| request).unwrap_or_default();
    let subject = match subject(
        request.username.as_deref(),
        request.login_type.as_deref(),
        request.email.as_deref(),
    ) {
        Ok(subject) => subject,
        Err(err) => return err.into_response(),
    };

    let ip = extract_client_ip(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        state.config.trusted_proxies(),
    );
    match state.login.resend_mfa(&subject, &ip).await {
        Ok(email_masked) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": STATUS_SUCCESS,
                "message": "A new verification code was sent",
                "email_masked": email_masked,
            })),
        )
            .into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_takes_precedence_over_email() -> anyhow::Result<()> {
        let subject = subject(Some(" Alice "), None, Some("a@b.com"))?;
        assert!(matches!(
            subject,
            MfaSubject::Identifier(LoginIdentifier::Username(ref name)) if name == "alice"
        ));
        Ok(())
    }

    #[test]
    fn blank_subject_is_invalid_input() {
        assert!(matches!(
            subject(Some("  "), None, None),
            Err(ApiError::InvalidInput(_))
        ));
    }

    #[test]
    fn email_subject_is_used_without_username() -> anyhow::Result<()> {
        let subject = subject(None, None, Some("a@b.com"))?;
        assert!(matches!(subject, MfaSubject::Email(ref email) if email == "a@b.com"));
        Ok(())
    }
}
