//! Admission for authenticated routes.
//!
//! Verifies the bearer token (with the server-side session check), resolves
//! the principal and tenant, enforces the absolute session timeout and
//! attaches an [`AuthContext`] to the request. Nothing downstream runs when
//! any step fails.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, Span};

use crate::api::error::ApiError;
use crate::api::handlers::auth::utils::extract_access_token;
use crate::api::state::AppState;
use crate::auth::token::{TokenPayload, VerifyMode};
use crate::tenant::{AuthContext, TENANT_HEADER};

/// True once `timeout` has elapsed since the original login.
///
/// Tokens without a login time count from their issue time.
#[must_use]
pub fn session_expired(payload: &TokenPayload, now: i64, timeout: Duration) -> bool {
    let started = payload.login_time().unwrap_or(payload.issued_at);
    let timeout = i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX);
    now.saturating_sub(started) >= timeout
}

pub async fn admit(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(token) = extract_access_token(request.headers()) else {
        return Err(ApiError::InvalidToken);
    };
    let payload = state.verifier.verify(&token, VerifyMode::SessionCheck).await?;

    let tenant_header = request
        .headers()
        .get(TENANT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let Some(context) = state
        .resolver
        .resolve(payload, tenant_header.as_deref())
        .await?
    else {
        return Err(ApiError::InvalidToken);
    };

    if session_expired(&context.payload, state.clock.now(), state.config.session_timeout()) {
        debug!(user_id = context.principal.id, "absolute session timeout reached");
        return Err(ApiError::SessionExpired);
    }

    Span::current().record("user_id", context.principal.id);
    request.extensions_mut().insert::<AuthContext>(context);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::{ClaimedIdentity, PayloadShape};
    use crate::auth::version::ProductVersion;

    fn payload(login_time: Option<i64>, issued_at: i64) -> TokenPayload {
        TokenPayload {
            identity: ClaimedIdentity {
                user_id: 1,
                tenant_id: None,
                username: "u".to_string(),
                email: "u@example.com".to_string(),
                first_name: None,
                last_name: None,
            },
            shape: PayloadShape::Legacy {
                session_id: None,
                login_time,
            },
            kind: None,
            version: ProductVersion::zero(),
            issued_at,
            expires_at: issued_at + 3600,
        }
    }

    #[test]
    fn timeout_counts_from_login_time() {
        let timeout = Duration::from_secs(3600);
        let token = payload(Some(1_000), 3_000);
        assert!(!session_expired(&token, 1_000 + 3_599, timeout));
        assert!(session_expired(&token, 1_000 + 3_600, timeout));
    }

    #[test]
    fn legacy_tokens_count_from_issue_time() {
        let timeout = Duration::from_secs(60);
        let token = payload(None, 500);
        assert!(!session_expired(&token, 559, timeout));
        assert!(session_expired(&token, 560, timeout));
    }
}
