//! Password authenticator.
//!
//! Stored verifiers are Argon2id PHC strings. Rows migrated from the old
//! directory may still hold the plaintext; those are compared in constant time
//! and rewritten as a PHC string on the first successful login.

use argon2::{
    password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use super::{normalize_identity, AuthError};
use crate::identity::{Principal, PrincipalStore};

/// What the caller typed into the identifier box, per `login_type`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginIdentifier {
    Username(String),
    UserId(i64),
}

impl LoginIdentifier {
    /// # Errors
    /// Returns `InvalidInput` for an unknown selector or a non-numeric id.
    pub fn parse(raw: &str, login_type: Option<&str>) -> Result<Self, AuthError> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(AuthError::InvalidInput("Missing username".to_string()));
        }
        match login_type.map(normalize_identity).as_deref() {
            None | Some("" | "username") => Ok(Self::Username(normalize_identity(value))),
            Some("user_id" | "userid" | "id") => value
                .parse::<i64>()
                .map(Self::UserId)
                .map_err(|_| AuthError::InvalidInput("User id must be numeric".to_string())),
            Some(_) => Err(AuthError::InvalidInput("Unknown login_type".to_string())),
        }
    }

    /// Key for the per-identity failure counter and lock.
    #[must_use]
    pub fn identity_key(&self) -> String {
        match self {
            Self::Username(username) => username.clone(),
            Self::UserId(id) => format!("id:{id}"),
        }
    }
}

enum StoredVerifier<'a> {
    Hashed(PasswordHash<'a>),
    Legacy(&'a str),
}

fn classify(stored: &str) -> StoredVerifier<'_> {
    if stored.starts_with('$') {
        if let Ok(hash) = PasswordHash::new(stored) {
            return StoredVerifier::Hashed(hash);
        }
    }
    StoredVerifier::Legacy(stored)
}

/// Hash a secret into an Argon2id PHC string with a fresh salt.
///
/// # Errors
/// Returns `Crypto` if hashing fails.
pub fn hash_secret(secret: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AuthError::Crypto(format!("argon2 hash failed: {err}")))
}

/// Burned on misses so unknown identifiers cost the same Argon2 work as
/// known ones.
static DECOY_VERIFIER: Lazy<Option<String>> = Lazy::new(|| hash_secret("custodia-decoy").ok());

fn spend_decoy_verification(password: &str) {
    if let Some(decoy) = DECOY_VERIFIER.as_deref() {
        let _ = verify_hashed(password, decoy);
    }
}

/// Verify a secret against a PHC string. Malformed hashes never verify.
#[must_use]
pub fn verify_hashed(secret: &str, phc: &str) -> bool {
    PasswordHash::new(phc).is_ok_and(|hash| {
        Argon2::default()
            .verify_password(secret.as_bytes(), &hash)
            .is_ok()
    })
}

#[derive(Clone)]
pub struct Authenticator {
    principals: Arc<dyn PrincipalStore>,
}

impl Authenticator {
    #[must_use]
    pub fn new(principals: Arc<dyn PrincipalStore>) -> Self {
        Self { principals }
    }

    /// # Errors
    /// Returns an error if the principal store fails.
    pub async fn resolve(&self, identifier: &LoginIdentifier) -> Result<Option<Principal>, AuthError> {
        let principal = match identifier {
            LoginIdentifier::Username(username) => {
                self.principals.find_by_username(username).await?
            }
            LoginIdentifier::UserId(id) => self.principals.find_by_id(*id).await?,
        };
        Ok(principal)
    }

    /// Check the password. Never touches abuse counters.
    ///
    /// # Errors
    /// `InvalidCredentials` for unknown identifiers and wrong passwords; the
    /// attempt fields are filled in by the abuse controller.
    pub async fn authenticate(
        &self,
        identifier: &LoginIdentifier,
        password: &str,
    ) -> Result<Principal, AuthError> {
        let rejected = || AuthError::InvalidCredentials {
            attempts: 0,
            limit: 0,
        };

        let Some(mut principal) = self.resolve(identifier).await? else {
            debug!("login for unknown identifier");
            spend_decoy_verification(password);
            return Err(rejected());
        };

        if principal.password_verifier.is_empty() {
            spend_decoy_verification(password);
            return Err(rejected());
        }

        let stored_verifier = principal.password_verifier.clone();
        match classify(&stored_verifier) {
            StoredVerifier::Hashed(hash) => {
                if Argon2::default()
                    .verify_password(password.as_bytes(), &hash)
                    .is_ok()
                {
                    Ok(principal)
                } else {
                    Err(rejected())
                }
            }
            StoredVerifier::Legacy(stored) => {
                if !bool::from(stored.as_bytes().ct_eq(password.as_bytes())) {
                    return Err(rejected());
                }
                let upgraded = hash_secret(password)?;
                if self
                    .principals
                    .replace_verifier(principal.id, stored, &upgraded)
                    .await?
                {
                    info!(user_id = principal.id, "upgraded legacy password verifier");
                    principal.password_verifier = upgraded;
                } else {
                    warn!(
                        user_id = principal.id,
                        "legacy password verifier changed during upgrade"
                    );
                }
                Ok(principal)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{MemoryPrincipalStore, TenantId};

    fn principal(verifier: &str) -> Principal {
        Principal {
            id: 11,
            username: "carol".to_string(),
            first_name: None,
            last_name: None,
            email: "carol@example.com".to_string(),
            password_verifier: verifier.to_string(),
            is_active: true,
            tenant_id: Some(TenantId(3)),
            license_key: None,
            consent_accepted: true,
            password_changed_at: None,
        }
    }

    fn authenticator(verifier: &str) -> anyhow::Result<(Arc<MemoryPrincipalStore>, Authenticator)> {
        let store = Arc::new(MemoryPrincipalStore::new());
        store.upsert(principal(verifier))?;
        let auth = Authenticator::new(store.clone());
        Ok((store, auth))
    }

    #[test]
    fn parses_identifier_by_login_type() {
        assert_eq!(
            LoginIdentifier::parse(" Carol ", None).ok(),
            Some(LoginIdentifier::Username("carol".to_string()))
        );
        assert_eq!(
            LoginIdentifier::parse("11", Some("user_id")).ok(),
            Some(LoginIdentifier::UserId(11))
        );
        assert!(matches!(
            LoginIdentifier::parse("eleven", Some("user_id")),
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            LoginIdentifier::parse("x", Some("badge")),
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            LoginIdentifier::parse("  ", None),
            Err(AuthError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn hashed_verifier_accepts_only_the_right_password() -> anyhow::Result<()> {
        let hash = hash_secret("P@ss1")?;
        let (_store, auth) = authenticator(&hash)?;
        let who = LoginIdentifier::Username("carol".to_string());
        assert!(auth.authenticate(&who, "P@ss1").await.is_ok());
        assert!(matches!(
            auth.authenticate(&who, "nope").await,
            Err(AuthError::InvalidCredentials { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn legacy_plaintext_is_upgraded_on_success() -> anyhow::Result<()> {
        let (store, auth) = authenticator("plain-old")?;
        let who = LoginIdentifier::UserId(11);
        let principal = auth.authenticate(&who, "plain-old").await?;
        assert!(principal.password_verifier.starts_with("$argon2id$"));

        let stored = store.find_by_id(11).await?.map(|p| p.password_verifier);
        assert_eq!(stored.as_deref(), Some(principal.password_verifier.as_str()));
        assert!(auth.authenticate(&who, "plain-old").await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn legacy_plaintext_mismatch_is_rejected_without_upgrade() -> anyhow::Result<()> {
        let (store, auth) = authenticator("plain-old")?;
        let who = LoginIdentifier::Username("carol".to_string());
        assert!(auth.authenticate(&who, "plain-new").await.is_err());
        let stored = store.find_by_id(11).await?.map(|p| p.password_verifier);
        assert_eq!(stored.as_deref(), Some("plain-old"));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_identifier_is_invalid_credentials() -> anyhow::Result<()> {
        let (_store, auth) = authenticator("x")?;
        let who = LoginIdentifier::Username("mallory".to_string());
        assert!(matches!(
            auth.authenticate(&who, "x").await,
            Err(AuthError::InvalidCredentials { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_identifier_still_pays_for_a_hash() -> anyhow::Result<()> {
        let (_store, auth) = authenticator("x")?;
        let who = LoginIdentifier::Username("mallory".to_string());
        assert!(auth.authenticate(&who, "custodia-decoy").await.is_err());

        let decoy = DECOY_VERIFIER.as_deref().unwrap_or_default();
        assert!(decoy.starts_with("$argon2id$"));
        assert!(matches!(classify(decoy), StoredVerifier::Hashed(_)));
        Ok(())
    }

    #[test]
    fn verify_hashed_rejects_malformed_hash() {
        assert!(!verify_hashed("123456", "not-a-hash"));
    }
}
