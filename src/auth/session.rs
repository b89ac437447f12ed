//! Server-side session bookkeeping on top of the ephemeral store.
//!
//! Keys:
//! - `session:{principal}` holds the session id of the latest login or refresh.
//! - `session_tenant:{principal}` holds the tenant recorded at issue time.
//! - `refresh_blacklist:{digest}` marks a spent refresh token; the value is the
//!   session id of its successor (empty after logout).
//! - `refresh_revoked:{session}` blocks further refreshes of a session family
//!   after a spent token was replayed.
//! - `refresh_claim:{digest}` counts rotation attempts for a refresh token;
//!   only the first increment wins, so a token rotates at most once even when
//!   two requests race past the blacklist check.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{EphemeralStore, StoreError, TtlPolicy};
use crate::identity::TenantId;

fn session_key(principal_id: i64) -> String {
    format!("session:{principal_id}")
}

fn tenant_key(principal_id: i64) -> String {
    format!("session_tenant:{principal_id}")
}

fn token_digest(refresh_token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(refresh_token.as_bytes()))
}

fn blacklist_key(refresh_token: &str) -> String {
    format!("refresh_blacklist:{}", token_digest(refresh_token))
}

fn claim_key(refresh_token: &str) -> String {
    format!("refresh_claim:{}", token_digest(refresh_token))
}

fn revoked_key(session_id: &str) -> String {
    format!("refresh_revoked:{session_id}")
}

/// What the blacklist knows about a spent refresh token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpentToken {
    Rotated { successor: String },
    LoggedOut,
}

#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn EphemeralStore>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn EphemeralStore>) -> Self {
        Self { store }
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn record_session(
        &self,
        principal_id: i64,
        session_id: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.store
            .set(&session_key(principal_id), session_id, ttl)
            .await
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn active_session(&self, principal_id: i64) -> Result<Option<String>, StoreError> {
        self.store.get(&session_key(principal_id)).await
    }

    /// Drop the session record if it still points at `session_id`.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn end_session(&self, principal_id: i64, session_id: &str) -> Result<bool, StoreError> {
        let current = self.active_session(principal_id).await?;
        if current.as_deref() == Some(session_id) {
            self.store.delete(&session_key(principal_id)).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn record_tenant(
        &self,
        principal_id: i64,
        tenant_id: TenantId,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.store
            .set(&tenant_key(principal_id), &tenant_id.to_string(), ttl)
            .await
    }

    /// # Errors
    /// Returns an error if the store fails or the value is not an integer.
    pub async fn session_tenant(&self, principal_id: i64) -> Result<Option<TenantId>, StoreError> {
        let key = tenant_key(principal_id);
        match self.store.get(&key).await? {
            Some(raw) => raw
                .parse::<i64>()
                .map(|id| Some(TenantId(id)))
                .map_err(|_| StoreError::Malformed { key }),
            None => Ok(None),
        }
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn blacklist(
        &self,
        refresh_token: &str,
        spent: &SpentToken,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let value = match spent {
            SpentToken::Rotated { successor } => successor.as_str(),
            SpentToken::LoggedOut => "",
        };
        self.store
            .set(&blacklist_key(refresh_token), value, ttl)
            .await
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn spent(&self, refresh_token: &str) -> Result<Option<SpentToken>, StoreError> {
        Ok(self
            .store
            .get(&blacklist_key(refresh_token))
            .await?
            .map(|value| {
                if value.is_empty() {
                    SpentToken::LoggedOut
                } else {
                    SpentToken::Rotated { successor: value }
                }
            }))
    }

    /// Claim a refresh token for rotation. `true` only for the first caller.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn claim_refresh(&self, refresh_token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let claims = self
            .store
            .increment(&claim_key(refresh_token), ttl, TtlPolicy::FixedFromFirst)
            .await?;
        Ok(claims == 1)
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn revoke_family(&self, session_id: &str, ttl: Duration) -> Result<(), StoreError> {
        self.store.set(&revoked_key(session_id), "1", ttl).await
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn is_revoked(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(self.store.get(&revoked_key(session_id)).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::clock::ManualClock;

    fn registry() -> (Arc<MemoryStore>, SessionRegistry) {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::new(clock));
        (store.clone(), SessionRegistry::new(store))
    }

    #[tokio::test]
    async fn blacklist_never_stores_the_raw_token() -> anyhow::Result<()> {
        let (store, registry) = registry();
        let token = "header.payload.signature";
        registry
            .blacklist(
                token,
                &SpentToken::Rotated {
                    successor: "jti-2".to_string(),
                },
                Duration::from_secs(60),
            )
            .await?;
        assert_eq!(store.get(&format!("refresh_blacklist:{token}")).await?, None);
        assert_eq!(
            registry.spent(token).await?,
            Some(SpentToken::Rotated {
                successor: "jti-2".to_string()
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn refresh_claim_is_granted_once() -> anyhow::Result<()> {
        let (store, registry) = registry();
        let token = "header.payload.signature";
        assert!(registry.claim_refresh(token, Duration::from_secs(60)).await?);
        assert!(!registry.claim_refresh(token, Duration::from_secs(60)).await?);
        assert!(registry.claim_refresh("other.token.value", Duration::from_secs(60)).await?);
        assert_eq!(store.get(&format!("refresh_claim:{token}")).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn end_session_only_clears_matching_session() -> anyhow::Result<()> {
        let (_store, registry) = registry();
        registry
            .record_session(5, "new", Duration::from_secs(60))
            .await?;
        assert!(!registry.end_session(5, "old").await?);
        assert_eq!(registry.active_session(5).await?.as_deref(), Some("new"));
        assert!(registry.end_session(5, "new").await?);
        assert_eq!(registry.active_session(5).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn session_tenant_round_trips() -> anyhow::Result<()> {
        let (_store, registry) = registry();
        assert_eq!(registry.session_tenant(9).await?, None);
        registry
            .record_tenant(9, TenantId(7), Duration::from_secs(60))
            .await?;
        assert_eq!(registry.session_tenant(9).await?, Some(TenantId(7)));
        Ok(())
    }
}
