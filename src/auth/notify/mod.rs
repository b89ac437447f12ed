//! Notification collaborator.
//!
//! The admission core only knows two messages: the lockout notice and the MFA
//! code. Delivery is best-effort; callers go through [`dispatch`], which bounds
//! the call with a timeout and swallows failures after logging them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use sqlx::PgPool;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument};

mod outbox;

pub use outbox::{spawn_outbox_worker, EmailMessage, EmailSender, EmailWorkerConfig, LogEmailSender};

pub const LOCKOUT_TEMPLATE: &str = "account_lockout";
pub const MFA_CODE_TEMPLATE: &str = "mfa_code";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockoutNotice {
    pub email: String,
    pub display_name: String,
    pub ip: String,
    pub locked_for: Duration,
}

#[derive(Clone, PartialEq, Eq)]
pub struct MfaCodeNotice {
    pub email: String,
    pub display_name: String,
    pub code: String,
    pub expires_in: Duration,
}

impl fmt::Debug for MfaCodeNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MfaCodeNotice")
            .field("email", &self.email)
            .field("code", &"[redacted]")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_lockout_email(&self, notice: &LockoutNotice) -> Result<()>;

    async fn send_mfa_code(&self, notice: &MfaCodeNotice) -> Result<()>;
}

/// Run a notification with a deadline. Returns whether it went through.
pub async fn dispatch<F>(what: &'static str, timeout: Duration, send: F) -> bool
where
    F: Future<Output = Result<()>> + Send,
{
    match tokio::time::timeout(timeout, send).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn!(notification = what, error = %err, "notification failed");
            false
        }
        Err(_) => {
            warn!(
                notification = what,
                timeout_secs = timeout.as_secs(),
                "notification timed out"
            );
            false
        }
    }
}

/// Writes notices to the log. Codes are never logged.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_lockout_email(&self, notice: &LockoutNotice) -> Result<()> {
        info!(
            email = %notice.email,
            ip = %notice.ip,
            locked_for_secs = notice.locked_for.as_secs(),
            "lockout notice"
        );
        Ok(())
    }

    async fn send_mfa_code(&self, notice: &MfaCodeNotice) -> Result<()> {
        info!(
            email = %notice.email,
            expires_in_secs = notice.expires_in.as_secs(),
            "mfa code notice"
        );
        Ok(())
    }
}

/// Enqueues notices in `email_outbox` for the background worker.
#[derive(Clone)]
pub struct OutboxNotifier {
    pool: PgPool,
}

impl OutboxNotifier {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn enqueue(&self, to_email: &str, template: &str, payload: serde_json::Value) -> Result<()> {
        let query = r"
            INSERT INTO email_outbox (id, to_email, template, payload_json, status, attempts, next_attempt_at, created_at)
            VALUES ($1, $2, $3, $4::jsonb, 'pending', 0, NOW(), NOW())
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT"
        );
        sqlx::query(query)
            .bind(uuid::Uuid::new_v4())
            .bind(to_email)
            .bind(template)
            .bind(payload.to_string())
            .execute(&self.pool)
            .instrument(span)
            .await
            .with_context(|| format!("failed to enqueue {template} email"))?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn send_lockout_email(&self, notice: &LockoutNotice) -> Result<()> {
        self.enqueue(
            &notice.email,
            LOCKOUT_TEMPLATE,
            json!({
                "display_name": notice.display_name,
                "ip": notice.ip,
                "locked_for_minutes": notice.locked_for.as_secs() / 60,
            }),
        )
        .await
    }

    async fn send_mfa_code(&self, notice: &MfaCodeNotice) -> Result<()> {
        self.enqueue(
            &notice.email,
            MFA_CODE_TEMPLATE,
            json!({
                "display_name": notice.display_name,
                "code": notice.code,
                "expires_in_minutes": notice.expires_in.as_secs() / 60,
            }),
        )
        .await
    }
}
