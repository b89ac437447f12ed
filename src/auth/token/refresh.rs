//! Refresh rotation.
//!
//! Flow Overview:
//! 1) Verify the presented token as a refresh token.
//! 2) Refuse spent tokens. Replaying one revokes the family it was rotated into.
//! 3) Check the session record when single-session mode is on.
//! 4) Claim the token atomically. Of two racing rotations only one gets past
//!    this point.
//! 5) Mint the successor pair, carrying the original login time forward.
//! 6) Blacklist the presented token with its successor. Minting always happens
//!    first, so a blacklist failure is logged and the new pair is still
//!    returned.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{IssuedTokens, TokenError, TokenIssuer, TokenVerifier, VerifyMode};
use crate::auth::session::{SessionRegistry, SpentToken};
use crate::clock::Clock;
use crate::identity::PrincipalStore;

#[derive(Clone)]
pub struct RefreshEngine {
    verifier: TokenVerifier,
    issuer: TokenIssuer,
    sessions: SessionRegistry,
    principals: Arc<dyn PrincipalStore>,
    clock: Arc<dyn Clock>,
}

impl RefreshEngine {
    #[must_use]
    pub fn new(
        verifier: TokenVerifier,
        issuer: TokenIssuer,
        sessions: SessionRegistry,
        principals: Arc<dyn PrincipalStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            verifier,
            issuer,
            sessions,
            principals,
            clock,
        }
    }

    /// # Errors
    /// - `ExpiredOrInvalid` / `UpgradeRequired` from verification.
    /// - `InvalidRefresh` for spent, revoked or concurrently claimed tokens and
    ///   vanished principals.
    /// - `SessionInvalidated` when a newer login replaced the session.
    pub async fn rotate(&self, refresh_token: &str) -> Result<IssuedTokens, TokenError> {
        let payload = self
            .verifier
            .verify(refresh_token, VerifyMode::Refresh)
            .await?;
        let refresh_ttl = self.issuer.settings().refresh_ttl;

        match self.sessions.spent(refresh_token).await? {
            Some(SpentToken::Rotated { successor }) => {
                warn!(
                    user_id = payload.principal_id(),
                    "spent refresh token replayed; revoking its successor"
                );
                self.sessions.revoke_family(&successor, refresh_ttl).await?;
                return Err(TokenError::InvalidRefresh);
            }
            Some(SpentToken::LoggedOut) => return Err(TokenError::InvalidRefresh),
            None => {}
        }

        if let Some(session_id) = payload.session_id() {
            if self.sessions.is_revoked(session_id).await? {
                return Err(TokenError::InvalidRefresh);
            }
        }

        let now = self.clock.now();
        let login_time = payload.login_time().unwrap_or(now);

        if self.issuer.settings().single_session {
            if let Some(session_id) = payload.session_id() {
                let active = self.sessions.active_session(payload.principal_id()).await?;
                if active.as_deref() != Some(session_id) {
                    return Err(TokenError::SessionInvalidated);
                }
            }
        }

        let Some(principal) = self.principals.find_by_id(payload.principal_id()).await? else {
            return Err(TokenError::InvalidRefresh);
        };

        let remaining =
            Duration::from_secs(u64::try_from(payload.expires_at - now).unwrap_or(0).max(1));
        if !self.sessions.claim_refresh(refresh_token, remaining).await? {
            warn!(
                user_id = principal.id,
                "refresh token already claimed by a concurrent rotation"
            );
            return Err(TokenError::InvalidRefresh);
        }

        let issued = self.issuer.issue(&principal, Some(login_time), None).await?;

        let spent = SpentToken::Rotated {
            successor: issued.session_id.clone(),
        };
        if let Err(err) = self
            .sessions
            .blacklist(refresh_token, &spent, remaining)
            .await
        {
            warn!(
                user_id = principal.id,
                error = %err,
                "failed to blacklist rotated refresh token"
            );
        }

        info!(user_id = principal.id, "refresh token rotated");
        Ok(issued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::{TokenKeys, TokenSettings};
    use crate::auth::version::{ProductVersion, StaticVersionSource, VersionInfo, VersionSource};
    use crate::cache::{EphemeralStore, MemoryStore, StoreError, TtlPolicy};
    use crate::clock::ManualClock;
    use crate::identity::{MemoryPrincipalStore, Principal, TenantId};
    use secrecy::SecretString;

    struct Fixture {
        clock: Arc<ManualClock>,
        keys: Arc<TokenKeys>,
        issuer: TokenIssuer,
        verifier: TokenVerifier,
        engine: RefreshEngine,
    }

    fn principal() -> Principal {
        Principal {
            id: 8,
            username: "alice".to_string(),
            first_name: None,
            last_name: None,
            email: "alice@example.com".to_string(),
            password_verifier: String::new(),
            is_active: true,
            tenant_id: Some(TenantId(7)),
            license_key: None,
            consent_accepted: true,
            password_changed_at: None,
        }
    }

    /// Hands control back to the runtime before every operation, the way a
    /// networked cache would.
    struct YieldingStore(MemoryStore);

    #[async_trait::async_trait]
    impl EphemeralStore for YieldingStore {
        async fn increment(
            &self,
            key: &str,
            ttl: Duration,
            policy: TtlPolicy,
        ) -> Result<u64, StoreError> {
            tokio::task::yield_now().await;
            self.0.increment(key, ttl, policy).await
        }

        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            tokio::task::yield_now().await;
            self.0.get(key).await
        }

        async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.0.set(key, value, ttl).await
        }

        async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
            tokio::task::yield_now().await;
            self.0.take(key).await
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.0.delete(key).await
        }
    }

    fn fixture() -> anyhow::Result<Fixture> {
        fixture_on(|clock| Arc::new(MemoryStore::new(clock)))
    }

    fn fixture_on(
        store: impl FnOnce(Arc<ManualClock>) -> Arc<dyn EphemeralStore>,
    ) -> anyhow::Result<Fixture> {
        let clock = Arc::new(ManualClock::new(10_000));
        let sessions = SessionRegistry::new(store(clock.clone()));
        let principals = Arc::new(MemoryPrincipalStore::new());
        principals.upsert(principal())?;
        let keys = Arc::new(TokenKeys::from_secret(&SecretString::from(
            "refresh-test".to_string(),
        ))?);
        let versions: Arc<dyn VersionSource> = Arc::new(StaticVersionSource::new(
            VersionInfo::new(ProductVersion::new(vec![1]), ProductVersion::new(vec![1]))?,
        ));
        let issuer = TokenIssuer::new(
            keys.clone(),
            versions.clone(),
            sessions.clone(),
            clock.clone(),
            TokenSettings {
                access_ttl: Duration::from_secs(3600),
                refresh_ttl: Duration::from_secs(604_800),
                single_session: true,
            },
        );
        let verifier =
            TokenVerifier::new(keys.clone(), versions, sessions.clone(), clock.clone(), true);
        let engine = RefreshEngine::new(
            verifier.clone(),
            issuer.clone(),
            sessions,
            principals,
            clock.clone(),
        );
        Ok(Fixture {
            clock,
            keys,
            issuer,
            verifier,
            engine,
        })
    }

    #[tokio::test]
    async fn rotation_preserves_login_time_and_changes_session() -> anyhow::Result<()> {
        let f = fixture()?;
        let first = f.issuer.issue(&principal(), None, None).await?;
        f.clock.advance(120);
        let second = f.engine.rotate(&first.refresh_token).await?;

        let old = f.keys.decode(&first.refresh_token)?;
        let new = f.keys.decode(&second.refresh_token)?;
        assert_eq!(new.login_time, old.login_time);
        assert_eq!(new.login_time, Some(10_000));
        assert_ne!(new.jti, old.jti);
        assert_eq!(new.iat, 10_120);
        Ok(())
    }

    #[tokio::test]
    async fn second_use_is_refused_and_revokes_successor() -> anyhow::Result<()> {
        let f = fixture()?;
        let first = f.issuer.issue(&principal(), None, None).await?;
        let second = f.engine.rotate(&first.refresh_token).await?;

        assert!(matches!(
            f.engine.rotate(&first.refresh_token).await,
            Err(TokenError::InvalidRefresh)
        ));
        assert!(matches!(
            f.engine.rotate(&second.refresh_token).await,
            Err(TokenError::InvalidRefresh)
        ));
        // Access tokens already minted stay usable.
        assert!(f
            .verifier
            .verify(&second.access_token, VerifyMode::SessionCheck)
            .await
            .is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn racing_rotations_of_one_token_have_one_winner() -> anyhow::Result<()> {
        let f = fixture_on(|clock| Arc::new(YieldingStore(MemoryStore::new(clock))))?;
        let first = f.issuer.issue(&principal(), None, None).await?;

        let (left, right) = tokio::join!(
            f.engine.rotate(&first.refresh_token),
            f.engine.rotate(&first.refresh_token)
        );
        let winners = [left.is_ok(), right.is_ok()]
            .iter()
            .filter(|ok| **ok)
            .count();
        assert_eq!(winners, 1);
        assert!(matches!(
            f.engine.rotate(&first.refresh_token).await,
            Err(TokenError::InvalidRefresh)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn legacy_refresh_token_gets_login_time_now() -> anyhow::Result<()> {
        let f = fixture()?;
        let legacy = f.keys.sign(&crate::auth::token::WireClaims {
            user_id: 8,
            tenant_id: Some(7),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            first_name: None,
            last_name: None,
            login_time: None,
            jti: None,
            ver: Some(ProductVersion::new(vec![1])),
            min_ver: None,
            exp: 20_000,
            iat: 9_000,
            typ: Some(crate::auth::token::TokenKind::Refresh),
        })?;
        let issued = f.engine.rotate(&legacy).await?;
        assert_eq!(issued.login_time, 10_000);
        Ok(())
    }

    #[tokio::test]
    async fn replaced_session_cannot_refresh() -> anyhow::Result<()> {
        let f = fixture()?;
        let first = f.issuer.issue(&principal(), None, None).await?;
        let _newer_login = f.issuer.issue(&principal(), None, None).await?;
        assert!(matches!(
            f.engine.rotate(&first.refresh_token).await,
            Err(TokenError::SessionInvalidated)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn access_token_cannot_refresh() -> anyhow::Result<()> {
        let f = fixture()?;
        let first = f.issuer.issue(&principal(), None, None).await?;
        assert!(matches!(
            f.engine.rotate(&first.access_token).await,
            Err(TokenError::ExpiredOrInvalid)
        ));
        Ok(())
    }
}
