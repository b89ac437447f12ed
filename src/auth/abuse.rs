//! Abuse controller.
//!
//! Flow Overview:
//! 1) Charge the caller's IP (fixed 60s window from the first attempt).
//! 2) Refuse identities inside a lockout window without touching the verifier.
//! 3) Count failures per identity (15 minute window sliding on each failure);
//!    the failure that reaches the limit opens a lockout and resets the count.
//! 4) A successful login clears both the count and the lock.
//!
//! All counters live in the shared [`EphemeralStore`]; the increment returns
//! the post-increment value atomically, so exactly one caller trips the lock.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::AuthError;
use crate::cache::{ttl_seconds, EphemeralStore, StoreError, TtlPolicy};
use crate::clock::Clock;

const IP_WINDOW: Duration = Duration::from_secs(60);
const IDENTITY_WINDOW: Duration = Duration::from_secs(15 * 60);

#[derive(Clone, Copy, Debug)]
pub struct AbusePolicy {
    pub ip_limit: u64,
    pub identity_limit: u64,
    pub lockout: Duration,
}

/// Result of recording a failed password check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureOutcome {
    Counted { attempts: u64, limit: u64 },
    Locked { locked_until: i64, remaining_seconds: u64 },
}

#[derive(Clone)]
pub struct AbuseController {
    store: Arc<dyn EphemeralStore>,
    clock: Arc<dyn Clock>,
    policy: AbusePolicy,
}

fn ip_key(scope: &str, ip: &str) -> String {
    format!("{scope}_attempts:{ip}")
}

fn identity_key(identity: &str) -> String {
    format!("identity_attempts:{identity}")
}

fn lock_key(identity: &str) -> String {
    format!("locked_until:{identity}")
}

impl AbuseController {
    #[must_use]
    pub fn new(store: Arc<dyn EphemeralStore>, clock: Arc<dyn Clock>, policy: AbusePolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> AbusePolicy {
        self.policy
    }

    /// Charge one login attempt to `ip`.
    ///
    /// # Errors
    /// `RateLimited` once the IP exceeds its per-minute allowance.
    pub async fn charge_login_ip(&self, ip: &str) -> Result<(), AuthError> {
        self.charge("ip", ip, self.policy.ip_limit).await
    }

    /// Charge one attempt to `ip` under an arbitrary scope with its own limit.
    ///
    /// # Errors
    /// `RateLimited` once the counter exceeds `limit` inside the window.
    pub async fn charge(&self, scope: &str, ip: &str, limit: u64) -> Result<(), AuthError> {
        let attempts = self
            .store
            .increment(&ip_key(scope, ip), IP_WINDOW, TtlPolicy::FixedFromFirst)
            .await?;
        if attempts > limit {
            warn!(scope, attempts, "ip rate limit exceeded");
            return Err(AuthError::RateLimited("Too many attempts from this IP"));
        }
        Ok(())
    }

    /// # Errors
    /// `AccountLocked` with the remaining seconds while a lock is active.
    pub async fn ensure_not_locked(&self, identity: &str) -> Result<(), AuthError> {
        let Some(raw) = self.store.get(&lock_key(identity)).await? else {
            return Ok(());
        };
        let locked_until: i64 = raw.parse().map_err(|_| StoreError::Malformed {
            key: lock_key(identity),
        })?;
        let now = self.clock.now();
        if locked_until > now {
            return Err(AuthError::AccountLocked {
                remaining_seconds: u64::try_from(locked_until - now).unwrap_or(0),
            });
        }
        Ok(())
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn record_failure(&self, identity: &str) -> Result<FailureOutcome, AuthError> {
        let attempts = self
            .store
            .increment(
                &identity_key(identity),
                IDENTITY_WINDOW,
                TtlPolicy::SlideOnWrite,
            )
            .await?;
        let limit = self.policy.identity_limit;
        if attempts < limit {
            return Ok(FailureOutcome::Counted { attempts, limit });
        }

        let lockout_seconds = ttl_seconds(self.policy.lockout);
        let locked_until = self.clock.now().saturating_add(lockout_seconds);
        self.store
            .set(
                &lock_key(identity),
                &locked_until.to_string(),
                self.policy.lockout,
            )
            .await?;
        self.store.delete(&identity_key(identity)).await?;
        info!(identity, locked_until, "identity locked after repeated failures");
        Ok(FailureOutcome::Locked {
            locked_until,
            remaining_seconds: self.policy.lockout.as_secs(),
        })
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn record_success(&self, identity: &str) -> Result<(), AuthError> {
        self.store.delete(&identity_key(identity)).await?;
        self.store.delete(&lock_key(identity)).await?;
        Ok(())
    }
}
