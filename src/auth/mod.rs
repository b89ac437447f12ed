//! Authentication core: password verification, abuse control, MFA, tokens.

pub mod abuse;
pub mod captcha;
pub mod license;
pub mod login;
pub mod mfa;
pub mod notify;
pub mod oauth;
pub mod password;
pub mod session;
pub mod token;
pub mod version;

use crate::cache::StoreError;

/// Failures of the password-login path.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials ({attempts}/{limit} attempts)")]
    InvalidCredentials { attempts: u64, limit: u64 },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("rate limited: {0}")]
    RateLimited(&'static str),
    #[error("account locked for another {remaining_seconds}s")]
    AccountLocked { remaining_seconds: u64 },
    #[error("license check failed")]
    LicenseInvalid,
    #[error("crypto failure: {0}")]
    Crypto(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Lower-cased, trimmed form used for lookups and counter keys.
#[must_use]
pub fn normalize_identity(value: &str) -> String {
    value.trim().to_lowercase()
}

/// `alice@example.com` becomes `a***@example.com`.
#[must_use]
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first: String = local.chars().take(1).collect();
            format!("{first}***@{domain}")
        }
        _ => "***".to_string(),
    }
}
