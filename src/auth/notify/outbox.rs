//! Email outbox worker.
//!
//! Notices are rows in `email_outbox`. The worker claims due rows with
//! `FOR UPDATE SKIP LOCKED` (so several replicas never deliver the same row),
//! hands each to an [`EmailSender`], then marks it `sent`, reschedules it with
//! exponential backoff, or gives up and marks it `failed`. Rows that reach
//! `sent` or `failed` have their payload emptied, since MFA payloads carry the
//! plaintext code.

use anyhow::{Context, Result};
use rand::Rng;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload_json: String,
}

impl std::fmt::Debug for EmailMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailMessage")
            .field("to_email", &self.to_email)
            .field("template", &self.template)
            .field("payload_json", &"<redacted>")
            .finish()
    }
}

pub trait EmailSender: Send + Sync {
    /// # Errors
    /// Any error reschedules the message.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Development sender. Logs the envelope only; payloads may carry a code.
#[derive(Clone, Debug, Default)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            payload_bytes = message.payload_json.len(),
            "outbox email delivered to log"
        );
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EmailWorkerConfig {
    poll_interval: Duration,
    batch_size: usize,
    max_attempts: u32,
    retry_base: Duration,
    retry_cap: Duration,
}

impl EmailWorkerConfig {
    /// 5s poll, batches of 10, 5 attempts, retries backing off from 5s up to 5m.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            max_attempts: 5,
            retry_base: Duration::from_secs(5),
            retry_cap: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_poll_interval_seconds(mut self, seconds: u64) -> Self {
        self.poll_interval = Duration::from_secs(seconds.max(1));
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for EmailWorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub fn spawn_outbox_worker(
    pool: PgPool,
    sender: Arc<dyn EmailSender>,
    config: EmailWorkerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match deliver_due(&pool, sender.as_ref(), &config).await {
                Ok(0) => {}
                Ok(delivered) => debug!(delivered, "outbox batch processed"),
                Err(err) => error!("outbox batch failed: {err:#}"),
            }
        }
    })
}

enum Settlement {
    Sent,
    Retry { after: Duration, reason: String },
    GiveUp { reason: String },
}

fn settle(attempt: u32, outcome: Result<()>, config: &EmailWorkerConfig) -> Settlement {
    match outcome {
        Ok(()) => Settlement::Sent,
        Err(err) if attempt >= config.max_attempts => Settlement::GiveUp {
            reason: err.to_string(),
        },
        Err(err) => Settlement::Retry {
            after: retry_after(attempt, config.retry_base, config.retry_cap),
            reason: err.to_string(),
        },
    }
}

async fn deliver_due(
    pool: &PgPool,
    sender: &dyn EmailSender,
    config: &EmailWorkerConfig,
) -> Result<usize> {
    let mut tx = pool.begin().await.context("begin outbox transaction")?;

    let query = r"
        SELECT id, to_email, template, payload_json::text AS payload_json, attempts
        FROM email_outbox
        WHERE status = 'pending' AND next_attempt_at <= NOW()
        ORDER BY next_attempt_at, created_at
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT"
    );
    let rows = sqlx::query(query)
        .bind(i64::try_from(config.batch_size()).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .instrument(span)
        .await
        .context("claim outbox batch")?;

    let claimed = rows.len();
    for row in rows {
        let id: Uuid = row.get("id");
        let previous: i32 = row.get("attempts");
        let attempt = u32::try_from(previous).unwrap_or(0).saturating_add(1);
        let message = EmailMessage {
            to_email: row.get("to_email"),
            template: row.get("template"),
            payload_json: row.get("payload_json"),
        };
        let settlement = settle(attempt, sender.send(&message), config);
        record_settlement(&mut tx, id, attempt, settlement).await?;
    }

    tx.commit().await.context("commit outbox batch")?;
    Ok(claimed)
}

const MARK_SENT: &str = r"
    UPDATE email_outbox
    SET status = 'sent', attempts = $2, last_error = NULL, sent_at = NOW(),
        payload_json = '{}'::jsonb
    WHERE id = $1
";

const RESCHEDULE: &str = r"
    UPDATE email_outbox
    SET attempts = $2, last_error = $3,
        next_attempt_at = NOW() + ($4 * INTERVAL '1 millisecond')
    WHERE id = $1
";

const MARK_FAILED: &str = r"
    UPDATE email_outbox
    SET status = 'failed', attempts = $2, last_error = $3,
        payload_json = '{}'::jsonb
    WHERE id = $1
";

async fn record_settlement(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    attempt: u32,
    settlement: Settlement,
) -> Result<()> {
    let attempts = i32::try_from(attempt).unwrap_or(i32::MAX);
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE"
    );
    let statement = match settlement {
        Settlement::Sent => sqlx::query(MARK_SENT).bind(id).bind(attempts),
        Settlement::Retry { after, reason } => sqlx::query(RESCHEDULE)
            .bind(id)
            .bind(attempts)
            .bind(reason)
            .bind(i64::try_from(after.as_millis()).unwrap_or(i64::MAX)),
        Settlement::GiveUp { reason } => sqlx::query(MARK_FAILED)
            .bind(id)
            .bind(attempts)
            .bind(reason),
    };
    statement
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("record outbox settlement")?;
    Ok(())
}

/// `base * 2^(attempt-1)` capped at `cap`, then jittered into `[d/2, d]`.
fn retry_after(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let raw = base.checked_mul(1 << exponent).unwrap_or(cap).min(cap);
    let millis = u64::try_from(raw.as_millis()).unwrap_or(u64::MAX);
    if millis < 2 {
        return raw;
    }
    let floor = millis / 2;
    Duration::from_millis(floor + rand::thread_rng().gen_range(0..=millis - floor))
}
