use std::sync::Arc;
use tracing::debug;

use super::{TokenError, TokenKeys, TokenKind, TokenPayload};
use crate::auth::session::SessionRegistry;
use crate::auth::version::VersionSource;
use crate::clock::Clock;

/// Which path is asking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyMode {
    /// Plain access-token check, no session lookup.
    Access,
    /// Only refresh tokens are accepted.
    Refresh,
    /// Access check plus the single-session comparison.
    SessionCheck,
}

#[derive(Clone)]
pub struct TokenVerifier {
    keys: Arc<TokenKeys>,
    versions: Arc<dyn VersionSource>,
    sessions: SessionRegistry,
    clock: Arc<dyn Clock>,
    single_session: bool,
}

impl TokenVerifier {
    #[must_use]
    pub fn new(
        keys: Arc<TokenKeys>,
        versions: Arc<dyn VersionSource>,
        sessions: SessionRegistry,
        clock: Arc<dyn Clock>,
        single_session: bool,
    ) -> Self {
        Self {
            keys,
            versions,
            sessions,
            clock,
            single_session,
        }
    }

    /// # Errors
    /// - `ExpiredOrInvalid` for bad signatures, expired or wrong-typed tokens.
    /// - `UpgradeRequired` when the token's version is below the floor.
    /// - `SessionInvalidated` in session-check mode when a newer login replaced
    ///   the token's session. Tokens without a session id pass.
    pub async fn verify(&self, token: &str, mode: VerifyMode) -> Result<TokenPayload, TokenError> {
        let claims = self.keys.decode(token)?;
        if claims.exp <= self.clock.now() {
            return Err(TokenError::ExpiredOrInvalid);
        }
        let payload = TokenPayload::from(claims);

        let is_refresh = payload.kind == Some(TokenKind::Refresh);
        match mode {
            VerifyMode::Refresh if !is_refresh => return Err(TokenError::ExpiredOrInvalid),
            VerifyMode::Access | VerifyMode::SessionCheck if is_refresh => {
                return Err(TokenError::ExpiredOrInvalid)
            }
            _ => {}
        }

        let versions = self.versions.current().await?;
        if payload.version < *versions.min_supported() {
            return Err(TokenError::UpgradeRequired {
                required: versions.min_supported().clone(),
                current: payload.version.clone(),
            });
        }

        if mode == VerifyMode::SessionCheck && self.single_session {
            if let Some(session_id) = payload.session_id() {
                let active = self.sessions.active_session(payload.principal_id()).await?;
                if active.as_deref() != Some(session_id) {
                    debug!(
                        user_id = payload.principal_id(),
                        "token session no longer active"
                    );
                    return Err(TokenError::SessionInvalidated);
                }
            }
        }

        Ok(payload)
    }
}
