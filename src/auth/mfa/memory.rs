use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::{ChallengeStatus, ChallengeStore, MfaChallenge};
use crate::cache::StoreError;

/// Challenges keyed by principal, one per principal.
#[derive(Debug, Default)]
pub struct MemoryChallengeStore {
    challenges: Mutex<HashMap<i64, MfaChallenge>>,
}

impl MemoryChallengeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut HashMap<i64, MfaChallenge>) -> T) -> Result<T, StoreError> {
        let mut guard = self.challenges.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&mut guard))
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn current(&self, principal_id: i64) -> Result<Option<MfaChallenge>, StoreError> {
        self.with(|challenges| challenges.get(&principal_id).cloned())
    }

    async fn replace(&self, challenge: &MfaChallenge) -> Result<(), StoreError> {
        self.with(|challenges| {
            challenges.insert(challenge.principal_id, challenge.clone());
        })
    }

    async fn record_failure(
        &self,
        id: Uuid,
        max_attempts: u32,
    ) -> Result<Option<MfaChallenge>, StoreError> {
        self.with(|challenges| {
            let challenge = challenges
                .values_mut()
                .find(|c| c.id == id && c.status == ChallengeStatus::Pending)?;
            challenge.attempts = challenge.attempts.saturating_add(1);
            if challenge.attempts >= max_attempts {
                challenge.status = ChallengeStatus::Exhausted;
            }
            Some(challenge.clone())
        })
    }

    async fn claim(&self, id: Uuid) -> Result<bool, StoreError> {
        self.with(|challenges| {
            let owner = challenges
                .iter()
                .find(|(_, c)| c.id == id && c.status == ChallengeStatus::Pending)
                .map(|(principal_id, _)| *principal_id);
            owner.is_some_and(|principal_id| challenges.remove(&principal_id).is_some())
        })
    }

    async fn mark_expired(&self, id: Uuid) -> Result<(), StoreError> {
        self.with(|challenges| {
            if let Some(challenge) = challenges
                .values_mut()
                .find(|c| c.id == id && c.status == ChallengeStatus::Pending)
            {
                challenge.status = ChallengeStatus::Expired;
            }
        })
    }
}
