//! Tenant isolation.
//!
//! [`TenantResolver`] decides which tenant a request acts for. The result
//! travels with the request as an [`AuthContext`]; handlers take a
//! [`TenantScope`] and can only reach tenant-scoped tables through
//! [`tenant_aware`], which filters by tenant and re-checks every row it hands
//! back.

use std::sync::Arc;
use tracing::debug;

use crate::auth::session::SessionRegistry;
use crate::auth::token::TokenPayload;
use crate::cache::StoreError;
use crate::identity::{Principal, PrincipalStore, TenantId};

mod gate;
mod memory;
mod postgres;
mod scope;

pub use gate::{tenant_aware, ScopedTable, TenantRecord, TenantScoped, TenantTable};
pub use memory::MemoryTenantTable;
pub use postgres::PgRecordTable;
pub use scope::TenantScope;

pub const TENANT_HEADER: &str = "x-tenant-id";

#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("tenant required")]
    Required,
    /// A row owned by another tenant reached the gate.
    #[error("cross-tenant access")]
    CrossTenant,
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What admission attaches to every authenticated request.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub principal: Principal,
    pub payload: TokenPayload,
    pub tenant_id: Option<TenantId>,
}

#[derive(Clone)]
pub struct TenantResolver {
    sessions: SessionRegistry,
    principals: Arc<dyn PrincipalStore>,
    header_fallback: bool,
}

impl TenantResolver {
    #[must_use]
    pub fn new(
        sessions: SessionRegistry,
        principals: Arc<dyn PrincipalStore>,
        header_fallback: bool,
    ) -> Self {
        Self {
            sessions,
            principals,
            header_fallback,
        }
    }

    /// Load the principal named by the token and pick its tenant.
    ///
    /// Order: token claim, session record, principal record, then the
    /// `X-Tenant-ID` header when fallback is enabled. `Ok(None)` when the
    /// principal no longer exists.
    ///
    /// # Errors
    /// Returns an error if a store fails.
    pub async fn resolve(
        &self,
        payload: TokenPayload,
        tenant_header: Option<&str>,
    ) -> Result<Option<AuthContext>, StoreError> {
        let principal_id = payload.principal_id();
        let Some(principal) = self.principals.find_by_id(principal_id).await? else {
            debug!(user_id = principal_id, "token names an unknown principal");
            return Ok(None);
        };

        let tenant_id = match payload.tenant_id() {
            Some(tenant) => Some(tenant),
            None => match self.sessions.session_tenant(principal_id).await? {
                Some(tenant) => Some(tenant),
                None => principal.tenant_id.or_else(|| {
                    if self.header_fallback {
                        tenant_header
                            .and_then(|raw| raw.trim().parse::<i64>().ok())
                            .map(TenantId)
                    } else {
                        None
                    }
                }),
            },
        };

        Ok(Some(AuthContext {
            principal,
            payload,
            tenant_id,
        }))
    }
}
