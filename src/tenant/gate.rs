//! Tenant gate.
//!
//! Tables take the tenant as a mandatory argument of every operation and are
//! expected to filter on it. The gate does not trust them: each row coming
//! back is checked against the caller's tenant, and a foreign row is dropped
//! and reported as [`TenantError::CrossTenant`] instead of being returned.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use utoipa::ToSchema;

use super::{TenantError, TenantScope};
use crate::identity::TenantId;

/// A row that belongs to exactly one tenant.
pub trait TenantScoped: Clone + Send + Sync + 'static {
    fn id(&self) -> i64;

    fn assign_id(&mut self, id: i64);

    fn tenant_id(&self) -> TenantId;

    /// Overwrite the owning tenant.
    fn stamp(&mut self, tenant_id: TenantId);
}

#[async_trait]
pub trait TenantTable<T: TenantScoped>: Send + Sync {
    async fn find(&self, tenant_id: TenantId, id: i64) -> Result<Option<T>, TenantError>;

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<T>, TenantError>;

    async fn insert(&self, tenant_id: TenantId, row: T) -> Result<T, TenantError>;

    async fn update(&self, tenant_id: TenantId, id: i64, row: T) -> Result<Option<T>, TenantError>;

    async fn delete(&self, tenant_id: TenantId, id: i64) -> Result<bool, TenantError>;
}

/// A table pinned to one tenant. The only handle handlers get.
pub struct ScopedTable<T: TenantScoped> {
    table: Arc<dyn TenantTable<T>>,
    tenant_id: TenantId,
}

#[must_use]
pub fn tenant_aware<T: TenantScoped>(
    table: Arc<dyn TenantTable<T>>,
    scope: &TenantScope,
) -> ScopedTable<T> {
    ScopedTable {
        table,
        tenant_id: scope.tenant_id,
    }
}

impl<T: TenantScoped> ScopedTable<T> {
    #[must_use]
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    fn check(&self, row: T) -> Result<T, TenantError> {
        if row.tenant_id() == self.tenant_id {
            Ok(row)
        } else {
            // Row attributes stay out of the log.
            warn!(tenant_id = %self.tenant_id, "cross-tenant row blocked by tenant gate");
            Err(TenantError::CrossTenant)
        }
    }

    /// # Errors
    /// `NotFound` when absent, `CrossTenant` when the table leaked a foreign row.
    pub async fn find(&self, id: i64) -> Result<T, TenantError> {
        let row = self
            .table
            .find(self.tenant_id, id)
            .await?
            .ok_or(TenantError::NotFound)?;
        self.check(row)
    }

    /// # Errors
    /// `CrossTenant` if any returned row is foreign; nothing is returned then.
    pub async fn list(&self) -> Result<Vec<T>, TenantError> {
        self.table
            .list(self.tenant_id)
            .await?
            .into_iter()
            .map(|row| self.check(row))
            .collect()
    }

    /// New rows always land in the caller's tenant, whatever they claimed.
    ///
    /// # Errors
    /// Store errors, or `CrossTenant` if the table stored it elsewhere.
    pub async fn insert(&self, mut row: T) -> Result<T, TenantError> {
        row.stamp(self.tenant_id);
        let stored = self.table.insert(self.tenant_id, row).await?;
        self.check(stored)
    }

    /// # Errors
    /// `NotFound` when the row does not exist in this tenant.
    pub async fn update(&self, id: i64, mut row: T) -> Result<T, TenantError> {
        self.find(id).await?;
        row.stamp(self.tenant_id);
        row.assign_id(id);
        let stored = self
            .table
            .update(self.tenant_id, id, row)
            .await?
            .ok_or(TenantError::NotFound)?;
        self.check(stored)
    }

    /// # Errors
    /// `NotFound` when the row does not exist in this tenant.
    pub async fn delete(&self, id: i64) -> Result<(), TenantError> {
        self.find(id).await?;
        if self.table.delete(self.tenant_id, id).await? {
            Ok(())
        } else {
            Err(TenantError::NotFound)
        }
    }
}

/// Generic tenant-owned record backing the `/resource` endpoints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TenantRecord {
    #[serde(default)]
    pub id: i64,
    #[serde(default = "unassigned_tenant")]
    #[schema(value_type = i64)]
    pub tenant_id: TenantId,
    pub name: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
}

fn unassigned_tenant() -> TenantId {
    TenantId(0)
}

impl TenantScoped for TenantRecord {
    fn id(&self) -> i64 {
        self.id
    }

    fn assign_id(&mut self, id: i64) {
        self.id = id;
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    fn stamp(&mut self, tenant_id: TenantId) {
        self.tenant_id = tenant_id;
    }
}
