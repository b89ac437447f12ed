use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{Principal, PrincipalStore};
use crate::cache::StoreError;

/// In-memory principal directory keyed by id.
#[derive(Debug, Default)]
pub struct MemoryPrincipalStore {
    principals: RwLock<HashMap<i64, Principal>>,
}

impl MemoryPrincipalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a principal.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn upsert(&self, principal: Principal) -> Result<(), StoreError> {
        let mut principals = self.principals.write().map_err(|_| StoreError::Poisoned)?;
        principals.insert(principal.id, principal);
        Ok(())
    }

    fn find_by<F>(&self, predicate: F) -> Result<Option<Principal>, StoreError>
    where
        F: Fn(&Principal) -> bool,
    {
        let principals = self.principals.read().map_err(|_| StoreError::Poisoned)?;
        Ok(principals.values().find(|p| predicate(p)).cloned())
    }

    fn update<F>(&self, id: i64, apply: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut Principal) -> bool,
    {
        let mut principals = self.principals.write().map_err(|_| StoreError::Poisoned)?;
        Ok(principals.get_mut(&id).is_some_and(apply))
    }
}

#[async_trait]
impl PrincipalStore for MemoryPrincipalStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>, StoreError> {
        self.find_by(|p| p.username.eq_ignore_ascii_case(username))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Principal>, StoreError> {
        let principals = self.principals.read().map_err(|_| StoreError::Poisoned)?;
        Ok(principals.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError> {
        self.find_by(|p| p.email.eq_ignore_ascii_case(email))
    }

    async fn replace_verifier(
        &self,
        id: i64,
        expected: &str,
        replacement: &str,
    ) -> Result<bool, StoreError> {
        self.update(id, |p| {
            if p.password_verifier == expected {
                p.password_verifier = replacement.to_string();
                true
            } else {
                false
            }
        })
    }

    async fn activate(&self, id: i64) -> Result<(), StoreError> {
        self.update(id, |p| {
            p.is_active = true;
            true
        })?;
        Ok(())
    }

    async fn set_consent(&self, id: i64, accepted: bool) -> Result<(), StoreError> {
        self.update(id, |p| {
            p.consent_accepted = accepted;
            true
        })?;
        Ok(())
    }
}
