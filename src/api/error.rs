//! Error envelope.
//!
//! Every component error is mapped to a status code and
//! `{"status":"error","message":..,"code":..}` here and nowhere else.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Map, Value};
use tracing::{debug, error};

use crate::auth::login::LoginError;
use crate::auth::mfa::MfaError;
use crate::auth::token::TokenError;
use crate::auth::version::ProductVersion;
use crate::auth::AuthError;
use crate::cache::StoreError;
use crate::tenant::TenantError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid credentials")]
    InvalidCredentials { attempts: u64, limit: u64 },
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    RateLimited(String),
    #[error("account locked")]
    AccountLocked { remaining_seconds: u64 },
    #[error("{message}")]
    MfaFailed {
        message: String,
        remaining: Option<u32>,
    },
    #[error("a verification code was already sent")]
    ResendTooSoon { email_masked: String },
    #[error("session expired")]
    SessionExpired,
    #[error("session invalidated")]
    SessionInvalidated,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("invalid refresh token")]
    InvalidRefresh,
    #[error("client upgrade required")]
    UpgradeRequired {
        required: ProductVersion,
        current: ProductVersion,
    },
    #[error("license check failed")]
    LicenseInvalid,
    #[error("tenant required")]
    TenantRequired,
    #[error("not found")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials { .. }
            | Self::MfaFailed { .. }
            | Self::SessionExpired
            | Self::SessionInvalidated
            | Self::InvalidToken
            | Self::InvalidRefresh => StatusCode::UNAUTHORIZED,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited(_) | Self::ResendTooSoon { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::AccountLocked { .. } | Self::LicenseInvalid | Self::TenantRequired => {
                StatusCode::FORBIDDEN
            }
            Self::UpgradeRequired { .. } => StatusCode::UPGRADE_REQUIRED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials { .. } => "invalid_credentials",
            Self::InvalidInput(_) => "invalid_input",
            Self::RateLimited(_) => "rate_limited",
            Self::AccountLocked { .. } => "account_locked",
            Self::MfaFailed { .. } => "mfa_failed",
            Self::ResendTooSoon { .. } => "mfa_resend_too_soon",
            Self::SessionExpired => "session_expired",
            Self::SessionInvalidated => "session_invalidated",
            Self::InvalidToken => "invalid_token",
            Self::InvalidRefresh => "invalid_refresh",
            Self::UpgradeRequired { .. } => "upgrade_required",
            Self::LicenseInvalid => "license_invalid",
            Self::TenantRequired => "tenant_required",
            Self::NotFound => "not_found",
            Self::Internal(_) => "internal_error",
        }
    }

    fn message(&self) -> String {
        match self {
            Self::InvalidCredentials { attempts, limit } if *limit > 0 => {
                format!("Invalid credentials ({attempts}/{limit} attempts)")
            }
            Self::InvalidCredentials { .. } => "Invalid credentials".to_string(),
            Self::AccountLocked { remaining_seconds } => format!(
                "Account locked due to too many failed attempts. Try again in {} minutes",
                remaining_seconds.div_ceil(60)
            ),
            Self::SessionExpired => "Session expired, please log in again".to_string(),
            Self::SessionInvalidated => {
                "Session invalidated by a newer login, please log in again".to_string()
            }
            Self::InvalidToken => "Invalid or expired token".to_string(),
            Self::UpgradeRequired { required, .. } => {
                format!("Client version is no longer supported, upgrade to {required} or later")
            }
            Self::LicenseInvalid => "License is invalid or expired".to_string(),
            Self::TenantRequired => "Tenant context required".to_string(),
            Self::NotFound => "Not found".to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    fn details(&self) -> Map<String, Value> {
        let mut extra = Map::new();
        match self {
            Self::InvalidCredentials { attempts, limit } if *limit > 0 => {
                extra.insert("attempts".to_string(), json!(attempts));
                extra.insert("max_attempts".to_string(), json!(limit));
            }
            Self::AccountLocked { remaining_seconds } => {
                extra.insert("locked_until".to_string(), json!(remaining_seconds));
            }
            Self::MfaFailed { remaining, .. } => {
                extra.insert("requires_mfa".to_string(), Value::Bool(true));
                if let Some(remaining) = remaining {
                    extra.insert("remaining_attempts".to_string(), json!(remaining));
                }
            }
            Self::ResendTooSoon { email_masked } => {
                extra.insert("email_masked".to_string(), json!(email_masked));
            }
            Self::UpgradeRequired { required, current } => {
                extra.insert("min_supported_version".to_string(), json!(required.to_string()));
                extra.insert("token_version".to_string(), json!(current.to_string()));
            }
            _ => {}
        }
        extra
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let Self::Internal(detail) = &self {
            error!("request failed: {detail}");
        } else {
            debug!(status = status.as_u16(), code = self.code(), "request rejected");
        }

        let mut body = Map::new();
        body.insert("status".to_string(), json!("error"));
        body.insert("message".to_string(), json!(self.message()));
        body.insert("code".to_string(), json!(self.code()));
        body.extend(self.details());

        (status, Json(Value::Object(body))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials { attempts, limit } => {
                Self::InvalidCredentials { attempts, limit }
            }
            AuthError::InvalidInput(message) => Self::InvalidInput(message),
            AuthError::RateLimited(message) => Self::RateLimited(message.to_string()),
            AuthError::AccountLocked { remaining_seconds } => {
                Self::AccountLocked { remaining_seconds }
            }
            AuthError::LicenseInvalid => Self::LicenseInvalid,
            AuthError::Crypto(detail) => Self::Internal(detail),
            AuthError::Store(err) => err.into(),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::ExpiredOrInvalid => Self::InvalidToken,
            TokenError::InvalidRefresh => Self::InvalidRefresh,
            TokenError::UpgradeRequired { required, current } => {
                Self::UpgradeRequired { required, current }
            }
            TokenError::SessionInvalidated => Self::SessionInvalidated,
            TokenError::Crypto(detail) => Self::Internal(detail),
            TokenError::Store(err) => err.into(),
        }
    }
}

impl From<MfaError> for ApiError {
    fn from(err: MfaError) -> Self {
        match err {
            MfaError::InvalidCode { remaining } => Self::MfaFailed {
                message: format!("Invalid verification code, {remaining} attempts left"),
                remaining: Some(remaining),
            },
            MfaError::Exhausted => Self::MfaFailed {
                message: "Too many invalid codes, request a new one".to_string(),
                remaining: Some(0),
            },
            MfaError::Expired => Self::MfaFailed {
                message: "Verification code expired, request a new one".to_string(),
                remaining: None,
            },
            MfaError::Unavailable => Self::MfaFailed {
                message: "Verification failed".to_string(),
                remaining: None,
            },
            MfaError::ResendTooSoon { email_masked } => Self::ResendTooSoon { email_masked },
            MfaError::NoChallenge => {
                Self::InvalidInput("No verification in progress".to_string())
            }
            MfaError::Crypto(detail) => Self::Internal(detail),
            MfaError::Store(err) => err.into(),
        }
    }
}

impl From<LoginError> for ApiError {
    fn from(err: LoginError) -> Self {
        match err {
            LoginError::Auth(err) => err.into(),
            LoginError::Mfa(err) => err.into(),
            LoginError::Token(err) => err.into(),
        }
    }
}

impl From<TenantError> for ApiError {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::Required => Self::TenantRequired,
            TenantError::CrossTenant | TenantError::NotFound => Self::NotFound,
            TenantError::Store(err) => err.into(),
        }
    }
}
