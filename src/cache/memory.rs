use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ttl_seconds, EphemeralStore, StoreError, TtlPolicy};
use crate::clock::Clock;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    counter: u64,
    expires_at: i64,
}

/// Process-local store. Expired entries are dropped lazily on access.
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn live_entry<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: i64,
    ) -> Option<&'a mut Entry> {
        let expired = entries.get(key).is_some_and(|entry| entry.expires_at <= now);
        if expired {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn increment(
        &self,
        key: &str,
        ttl: Duration,
        policy: TtlPolicy,
    ) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let expires_at = now.saturating_add(ttl_seconds(ttl));
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;

        if let Some(entry) = Self::live_entry(&mut entries, key, now) {
            entry.counter = entry.counter.saturating_add(1);
            entry.value = entry.counter.to_string();
            if policy == TtlPolicy::SlideOnWrite {
                entry.expires_at = expires_at;
            }
            return Ok(entry.counter);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: "1".to_string(),
                counter: 1,
                expires_at,
            },
        );
        Ok(1)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(Self::live_entry(&mut entries, key, now).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                counter: 0,
                expires_at: now.saturating_add(ttl_seconds(ttl)),
            },
        );
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        let live = Self::live_entry(&mut entries, key, now).is_some();
        Ok(if live {
            entries.remove(key).map(|entry| entry.value)
        } else {
            None
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}
