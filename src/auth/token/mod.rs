//! Bearer tokens: issue, verify, rotate.
//!
//! Tokens are HS256 JWTs signed with the process-wide secret. Expiry is
//! checked against the injected clock rather than the library's wall clock.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};

use crate::auth::version::ProductVersion;
use crate::cache::StoreError;

pub mod claims;
mod issuer;
mod refresh;
mod verifier;

pub use claims::{ClaimedIdentity, PayloadShape, TokenKind, TokenPayload, WireClaims};
pub use issuer::{IssuedTokens, TokenIssuer, TokenSettings};
pub use refresh::RefreshEngine;
pub use verifier::{TokenVerifier, VerifyMode};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Bad signature, malformed, wrong type or past expiry. Which one is not disclosed.
    #[error("token expired or invalid")]
    ExpiredOrInvalid,
    #[error("invalid refresh token")]
    InvalidRefresh,
    #[error("upgrade required: token version {current} is below {required}")]
    UpgradeRequired {
        required: ProductVersion,
        current: ProductVersion,
    },
    #[error("session invalidated")]
    SessionInvalidated,
    #[error("crypto failure: {0}")]
    Crypto(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Signing material derived once from the configured secret.
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenKeys {
    /// # Errors
    /// Returns `Crypto` when the secret is empty.
    pub fn from_secret(secret: &SecretString) -> Result<Self, TokenError> {
        let bytes = secret.expose_secret().as_bytes();
        if bytes.is_empty() {
            return Err(TokenError::Crypto("signing secret is empty".to_string()));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
        })
    }

    pub(crate) fn sign(&self, claims: &WireClaims) -> Result<String, TokenError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|err| TokenError::Crypto(format!("jwt encode: {err}")))
    }

    /// Signature and structure only; expiry is the caller's job.
    pub(crate) fn decode(&self, token: &str) -> Result<WireClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp"]);
        jsonwebtoken::decode::<WireClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| TokenError::ExpiredOrInvalid)
    }
}
