//! Principals and tenants as the admission core sees them.
//!
//! The identity store owns these records; the core only reads them, upgrades
//! legacy password verifiers, flips the active flag on first login and records
//! consent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cache::StoreError;

mod memory;
mod postgres;

pub use memory::MemoryPrincipalStore;
pub use postgres::PgPrincipalStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub i64);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: i64,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
    /// PHC string, or a legacy plaintext value awaiting upgrade.
    pub password_verifier: String,
    pub is_active: bool,
    pub tenant_id: Option<TenantId>,
    pub license_key: Option<String>,
    pub consent_accepted: bool,
    pub password_changed_at: Option<i64>,
}

impl Principal {
    /// "First Last" when both names are known, otherwise the username.
    #[must_use]
    pub fn display_name(&self) -> String {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();
        if parts.is_empty() {
            self.username.clone()
        } else {
            parts.join(" ")
        }
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password_verifier", &"[redacted]")
            .field("is_active", &self.is_active)
            .field("tenant_id", &self.tenant_id)
            .field("consent_accepted", &self.consent_accepted)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait PrincipalStore: Send + Sync {
    /// Case-insensitive username lookup.
    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Principal>, StoreError>;

    /// Case-insensitive email lookup.
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError>;

    /// Replace the verifier only if it still equals `expected`.
    async fn replace_verifier(
        &self,
        id: i64,
        expected: &str,
        replacement: &str,
    ) -> Result<bool, StoreError>;

    async fn activate(&self, id: i64) -> Result<(), StoreError>;

    async fn set_consent(&self, id: i64, accepted: bool) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> Principal {
        Principal {
            id: 1,
            username: "alice".to_string(),
            first_name: Some("Alice".to_string()),
            last_name: Some("Liddell".to_string()),
            email: "alice@example.com".to_string(),
            password_verifier: "secret".to_string(),
            is_active: true,
            tenant_id: Some(TenantId(7)),
            license_key: None,
            consent_accepted: false,
            password_changed_at: None,
        }
    }

    #[test]
    fn display_name_prefers_full_name() {
        assert_eq!(principal().display_name(), "Alice Liddell");
    }

    #[test]
    fn display_name_falls_back_to_username() {
        let mut p = principal();
        p.first_name = None;
        p.last_name = Some("  ".to_string());
        assert_eq!(p.display_name(), "alice");
    }

    #[test]
    fn debug_redacts_verifier() {
        let rendered = format!("{:?}", principal());
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("[redacted]"));
    }
}
