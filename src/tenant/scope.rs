use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tracing::debug;

use super::AuthContext;
use crate::api::error::ApiError;
use crate::identity::TenantId;

/// Extractor for tenant-scoped handlers.
///
/// Rejects with 403 `tenant_required` before the handler runs when admission
/// could not resolve a tenant for the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TenantScope {
    pub tenant_id: TenantId,
    pub principal_id: i64,
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantScope
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(context) = parts.extensions.get::<AuthContext>() else {
            return Err(ApiError::InvalidToken);
        };
        let Some(tenant_id) = context.tenant_id else {
            debug!(user_id = context.principal.id, "no tenant for scoped endpoint");
            return Err(ApiError::TenantRequired);
        };
        Ok(Self {
            tenant_id,
            principal_id: context.principal.id,
        })
    }
}
