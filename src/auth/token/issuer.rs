use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{TokenError, TokenKeys, TokenKind, WireClaims};
use crate::auth::session::SessionRegistry;
use crate::auth::version::VersionSource;
use crate::cache::ttl_seconds;
use crate::clock::Clock;
use crate::identity::Principal;

#[derive(Clone, Copy, Debug)]
pub struct TokenSettings {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub single_session: bool,
}

/// An access/refresh pair sharing one session id and login time.
#[derive(Clone, Debug)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: i64,
    pub refresh_expires_at: i64,
    pub session_id: String,
    pub login_time: i64,
}

#[derive(Clone)]
pub struct TokenIssuer {
    keys: Arc<TokenKeys>,
    versions: Arc<dyn VersionSource>,
    sessions: SessionRegistry,
    clock: Arc<dyn Clock>,
    settings: TokenSettings,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(
        keys: Arc<TokenKeys>,
        versions: Arc<dyn VersionSource>,
        sessions: SessionRegistry,
        clock: Arc<dyn Clock>,
        settings: TokenSettings,
    ) -> Self {
        Self {
            keys,
            versions,
            sessions,
            clock,
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> TokenSettings {
        self.settings
    }

    /// Mint a token pair for `principal`.
    ///
    /// A fresh session id is generated unless one is supplied; `login_time`
    /// defaults to now. With single-session mode on, the session record is
    /// overwritten so every earlier session stops passing the session check.
    ///
    /// # Errors
    /// `Crypto` when signing fails, `Store` when the version source or the
    /// session record cannot be reached.
    pub async fn issue(
        &self,
        principal: &Principal,
        login_time: Option<i64>,
        session_id: Option<String>,
    ) -> Result<IssuedTokens, TokenError> {
        let now = self.clock.now();
        let login_time = login_time.unwrap_or(now);
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let versions = self.versions.current().await?;

        let access_expires_at = now.saturating_add(ttl_seconds(self.settings.access_ttl));
        let refresh_expires_at = now.saturating_add(ttl_seconds(self.settings.refresh_ttl));

        let claims = |kind: TokenKind, exp: i64| WireClaims {
            user_id: principal.id,
            tenant_id: principal.tenant_id.map(|tenant| tenant.0),
            username: principal.username.clone(),
            email: principal.email.clone(),
            first_name: principal.first_name.clone(),
            last_name: principal.last_name.clone(),
            login_time: Some(login_time),
            jti: Some(session_id.clone()),
            ver: Some(versions.latest().clone()),
            min_ver: Some(versions.min_supported().clone()),
            exp,
            iat: now,
            typ: Some(kind),
        };

        let access_token = self
            .keys
            .sign(&claims(TokenKind::Access, access_expires_at))?;
        let refresh_token = self
            .keys
            .sign(&claims(TokenKind::Refresh, refresh_expires_at))?;

        if self.settings.single_session {
            self.sessions
                .record_session(principal.id, &session_id, self.settings.refresh_ttl)
                .await?;
        }
        match principal.tenant_id {
            Some(tenant_id) => {
                self.sessions
                    .record_tenant(principal.id, tenant_id, self.settings.refresh_ttl)
                    .await?;
            }
            None => warn!(user_id = principal.id, "issuing tokens without a tenant"),
        }

        debug!(user_id = principal.id, session_id = %session_id, "issued token pair");
        Ok(IssuedTokens {
            access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at,
            session_id,
            login_time,
        })
    }
}
