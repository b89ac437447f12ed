//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::token::IssuedTokens;
use crate::identity::Principal;

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_MFA_REQUIRED: &str = "mfa_required";

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct LoginRequest {
    #[serde(default, alias = "user_id")]
    pub username: Option<String>,
    /// `username` (default) or `user_id`.
    #[serde(default)]
    pub login_type: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub captcha: Option<String>,
    #[serde(default)]
    pub otp: Option<String>,
}

/// Principal as presented to clients.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct UserSummary {
    pub user_id: i64,
    pub user_name: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub tenant_id: Option<i64>,
    /// `"Y"` or `"N"`.
    pub is_active: String,
}

impl From<&Principal> for UserSummary {
    fn from(principal: &Principal) -> Self {
        Self {
            user_id: principal.id,
            user_name: principal.username.clone(),
            email: principal.email.clone(),
            first_name: principal.first_name.clone(),
            last_name: principal.last_name.clone(),
            tenant_id: principal.tenant_id.map(|tenant| tenant.0),
            is_active: if principal.is_active { "Y" } else { "N" }.to_string(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub status: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds.
    pub access_token_expires: i64,
    pub refresh_token_expires: i64,
    pub consent_required: bool,
    pub user: UserSummary,
}

impl LoginResponse {
    #[must_use]
    pub fn new(principal: &Principal, tokens: &IssuedTokens) -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            access_token_expires: tokens.access_expires_at,
            refresh_token_expires: tokens.refresh_expires_at,
            consent_required: !principal.consent_accepted,
            user: principal.into(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaRequiredResponse {
    pub status: String,
    pub message: String,
    pub email_masked: String,
}

/// Identifies the paused login by `username` (with optional `login_type`) or `email`.
#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct MfaVerifyRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub login_type: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "otp")]
    pub code: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct MfaResendRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub login_type: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct RefreshRequest {
    /// Falls back to the refresh cookie when absent.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RefreshResponse {
    pub status: String,
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_expires: i64,
    pub refresh_token_expires: i64,
}

impl From<&IssuedTokens> for RefreshResponse {
    fn from(tokens: &IssuedTokens) -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            access_token_expires: tokens.access_expires_at,
            refresh_token_expires: tokens.refresh_expires_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

impl StatusResponse {
    #[must_use]
    pub fn success(message: &str) -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyResponse {
    pub status: String,
    pub user: UserSummary,
    /// Tenant the request was admitted for.
    pub tenant_id: Option<i64>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct ConsentRequest {
    /// Defaults to `true`.
    #[serde(default)]
    pub accepted: Option<bool>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ConsentResponse {
    pub status: String,
    pub consent_accepted: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VersionResponse {
    pub status: String,
    pub current_version: String,
    pub min_supported_version: String,
}

/// Error envelope, for documentation.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
    pub code: Option<String>,
}
