use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use super::{TenantError, TenantScoped, TenantTable};
use crate::cache::StoreError;
use crate::identity::TenantId;

/// In-memory table that filters on tenant like a `WHERE tenant_id = $1` would.
#[derive(Debug)]
pub struct MemoryTenantTable<T> {
    rows: RwLock<BTreeMap<i64, T>>,
    next_id: AtomicI64,
}

impl<T> Default for MemoryTenantTable<T> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl<T: TenantScoped> MemoryTenantTable<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row as-is, keeping its id and tenant. For fixtures.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn seed(&self, row: T) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|_| StoreError::Poisoned)?;
        self.next_id.fetch_max(row.id() + 1, Ordering::SeqCst);
        rows.insert(row.id(), row);
        Ok(())
    }
}

#[async_trait]
impl<T: TenantScoped> TenantTable<T> for MemoryTenantTable<T> {
    async fn find(&self, tenant_id: TenantId, id: i64) -> Result<Option<T>, TenantError> {
        let rows = self.rows.read().map_err(|_| StoreError::Poisoned)?;
        Ok(rows
            .get(&id)
            .filter(|row| row.tenant_id() == tenant_id)
            .cloned())
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<T>, TenantError> {
        let rows = self.rows.read().map_err(|_| StoreError::Poisoned)?;
        Ok(rows
            .values()
            .filter(|row| row.tenant_id() == tenant_id)
            .cloned()
            .collect())
    }

    async fn insert(&self, tenant_id: TenantId, mut row: T) -> Result<T, TenantError> {
        let mut rows = self.rows.write().map_err(|_| StoreError::Poisoned)?;
        row.assign_id(self.next_id.fetch_add(1, Ordering::SeqCst));
        row.stamp(tenant_id);
        rows.insert(row.id(), row.clone());
        Ok(row)
    }

    async fn update(&self, tenant_id: TenantId, id: i64, row: T) -> Result<Option<T>, TenantError> {
        let mut rows = self.rows.write().map_err(|_| StoreError::Poisoned)?;
        match rows.get_mut(&id) {
            Some(existing) if existing.tenant_id() == tenant_id => {
                *existing = row;
                Ok(Some(existing.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete(&self, tenant_id: TenantId, id: i64) -> Result<bool, TenantError> {
        let mut rows = self.rows.write().map_err(|_| StoreError::Poisoned)?;
        let owned = rows.get(&id).is_some_and(|row| row.tenant_id() == tenant_id);
        if owned {
            rows.remove(&id);
        }
        Ok(owned)
    }
}
