//! Shared ephemeral state with TTL.
//!
//! Session records, abuse counters, lockouts, the refresh blacklist and OAuth
//! state all live here. The only primitive beyond plain get/set is
//! [`EphemeralStore::increment`], which must be atomic per key: two concurrent
//! callers never observe the same post-increment value.

use async_trait::async_trait;
use std::time::Duration;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgEphemeralStore;

/// How an increment treats the key's expiry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TtlPolicy {
    /// Window starts at the first increment and is never extended.
    FixedFromFirst,
    /// Every increment pushes the expiry to `now + ttl`.
    SlideOnWrite,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("malformed stored value for {key}")]
    Malformed { key: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Increment the counter at `key` and return the new value.
    async fn increment(&self, key: &str, ttl: Duration, policy: TtlPolicy)
        -> Result<u64, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Read and remove in one step; a second caller gets `None`.
    async fn take(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

pub(crate) fn ttl_seconds(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
}
