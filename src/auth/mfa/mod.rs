//! One-time email codes.
//!
//! A challenge moves `pending -> verified | expired | exhausted`. At most one
//! challenge exists per principal; issuing a new one replaces the old. The
//! plaintext code only lives long enough to be handed to the notifier; the
//! store keeps an Argon2 hash.
//!
//! Verification claims the pending row (compare-and-delete), so two requests
//! racing with the right code cannot both succeed.

use async_trait::async_trait;
use rand::{rngs::OsRng, Rng};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::notify::{dispatch, MfaCodeNotice, Notifier};
use super::password::{hash_secret, verify_hashed};
use super::{mask_email, AuthError};
use crate::cache::{ttl_seconds, StoreError};
use crate::clock::Clock;
use crate::identity::Principal;

mod memory;
mod postgres;

pub use memory::MemoryChallengeStore;
pub use postgres::PgChallengeStore;

const CODE_DIGITS: u32 = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeStatus {
    Pending,
    Verified,
    Expired,
    Exhausted,
}

impl ChallengeStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Expired => "expired",
            Self::Exhausted => "exhausted",
        }
    }
}

impl FromStr for ChallengeStatus {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "expired" => Ok(Self::Expired),
            "exhausted" => Ok(Self::Exhausted),
            _ => Err(StoreError::Malformed {
                key: format!("mfa_challenges.status={value}"),
            }),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct MfaChallenge {
    pub id: Uuid,
    pub principal_id: i64,
    pub email: String,
    pub code_hash: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub attempts: u32,
    pub status: ChallengeStatus,
}

impl MfaChallenge {
    /// Expired from `expires_at` on, to the second.
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.status == ChallengeStatus::Expired || now >= self.expires_at
    }
}

impl fmt::Debug for MfaChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MfaChallenge")
            .field("id", &self.id)
            .field("principal_id", &self.principal_id)
            .field("expires_at", &self.expires_at)
            .field("attempts", &self.attempts)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ChallengeStore: Send + Sync {
    async fn current(&self, principal_id: i64) -> Result<Option<MfaChallenge>, StoreError>;

    /// Store `challenge` as the principal's only challenge.
    async fn replace(&self, challenge: &MfaChallenge) -> Result<(), StoreError>;

    /// Count a wrong code against a pending challenge, flipping it to
    /// `exhausted` once `max_attempts` is reached. `None` if it was not pending.
    async fn record_failure(
        &self,
        id: Uuid,
        max_attempts: u32,
    ) -> Result<Option<MfaChallenge>, StoreError>;

    /// Remove the challenge if it is still pending. Only one caller wins.
    async fn claim(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn mark_expired(&self, id: Uuid) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum MfaError {
    #[error("invalid code, {remaining} attempts left")]
    InvalidCode { remaining: u32 },
    #[error("too many invalid codes")]
    Exhausted,
    #[error("code expired")]
    Expired,
    /// No usable challenge. Nothing is counted.
    #[error("verification failed")]
    Unavailable,
    #[error("a code was already sent")]
    ResendTooSoon { email_masked: String },
    #[error("no challenge to resend")]
    NoChallenge,
    #[error("crypto failure: {0}")]
    Crypto(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<AuthError> for MfaError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Store(err) => Self::Store(err),
            other => Self::Crypto(other.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MfaSettings {
    pub code_ttl: Duration,
    pub max_attempts: u32,
    pub dispatch_timeout: Duration,
}

#[derive(Clone)]
pub struct MfaEngine {
    store: Arc<dyn ChallengeStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    settings: MfaSettings,
}

fn generate_code() -> String {
    let bound = 10_u32.pow(CODE_DIGITS);
    let value = OsRng.gen_range(0..bound);
    format!("{value:0width$}", width = CODE_DIGITS as usize)
}

impl MfaEngine {
    #[must_use]
    pub fn new(
        store: Arc<dyn ChallengeStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        settings: MfaSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            settings,
        }
    }

    /// Open a fresh challenge, send the code, return the masked address.
    ///
    /// # Errors
    /// Store or hashing failures. A failed dispatch is logged only.
    pub async fn start(&self, principal: &Principal) -> Result<String, MfaError> {
        let code = generate_code();
        let now = self.clock.now();
        let challenge = MfaChallenge {
            id: Uuid::new_v4(),
            principal_id: principal.id,
            email: principal.email.clone(),
            code_hash: hash_secret(&code)?,
            created_at: now,
            expires_at: now.saturating_add(ttl_seconds(self.settings.code_ttl)),
            attempts: 0,
            status: ChallengeStatus::Pending,
        };
        self.store.replace(&challenge).await?;
        debug!(user_id = principal.id, challenge_id = %challenge.id, "mfa challenge opened");

        let notice = MfaCodeNotice {
            email: principal.email.clone(),
            display_name: principal.display_name(),
            code,
            expires_in: self.settings.code_ttl,
        };
        dispatch(
            "mfa_code",
            self.settings.dispatch_timeout,
            self.notifier.send_mfa_code(&notice),
        )
        .await;

        Ok(mask_email(&principal.email))
    }

    /// # Errors
    /// See [`MfaError`]; every variant but `Store`/`Crypto` is a client failure.
    pub async fn verify(&self, principal: &Principal, code: &str) -> Result<MfaChallenge, MfaError> {
        let Some(challenge) = self.store.current(principal.id).await? else {
            return Err(MfaError::Unavailable);
        };
        if challenge.email != principal.email {
            warn!(user_id = principal.id, "mfa challenge email no longer matches");
            return Err(MfaError::Unavailable);
        }
        match challenge.status {
            ChallengeStatus::Pending => {}
            ChallengeStatus::Expired => return Err(MfaError::Expired),
            ChallengeStatus::Exhausted | ChallengeStatus::Verified => {
                return Err(MfaError::Unavailable)
            }
        }
        if challenge.is_expired_at(self.clock.now()) {
            self.store.mark_expired(challenge.id).await?;
            return Err(MfaError::Expired);
        }

        if verify_hashed(code.trim(), &challenge.code_hash) {
            if !self.store.claim(challenge.id).await? {
                return Err(MfaError::Unavailable);
            }
            info!(user_id = principal.id, "mfa challenge verified");
            return Ok(MfaChallenge {
                status: ChallengeStatus::Verified,
                ..challenge
            });
        }

        let max_attempts = self.settings.max_attempts;
        match self.store.record_failure(challenge.id, max_attempts).await? {
            Some(updated) if updated.status == ChallengeStatus::Exhausted => {
                warn!(user_id = principal.id, "mfa challenge exhausted");
                Err(MfaError::Exhausted)
            }
            Some(updated) => Err(MfaError::InvalidCode {
                remaining: max_attempts.saturating_sub(updated.attempts),
            }),
            None => Err(MfaError::Unavailable),
        }
    }

    /// Send a new code once the current one is no longer usable.
    ///
    /// # Errors
    /// `ResendTooSoon` while the current code is pending and unexpired,
    /// `NoChallenge` when nothing was ever issued.
    pub async fn resend(&self, principal: &Principal) -> Result<String, MfaError> {
        let Some(challenge) = self.store.current(principal.id).await? else {
            return Err(MfaError::NoChallenge);
        };
        if challenge.status == ChallengeStatus::Pending
            && !challenge.is_expired_at(self.clock.now())
        {
            return Err(MfaError::ResendTooSoon {
                email_masked: mask_email(&principal.email),
            });
        }
        self.start(principal).await
    }
}
