//! Token claim layout.
//!
//! [`WireClaims`] is exactly what is signed. Decoded tokens are lifted into a
//! [`TokenPayload`] whose [`PayloadShape`] says whether the token carries the
//! session id and original-login timestamp (current) or predates them (legacy).
//! Unknown claims are ignored.

use serde::{Deserialize, Serialize};

use crate::auth::version::ProductVersion;
use crate::identity::{Principal, TenantId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireClaims {
    pub user_id: i64,
    #[serde(default)]
    pub tenant_id: Option<i64>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ver: Option<ProductVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_ver: Option<ProductVersion>,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<TokenKind>,
}

/// Who the token says the caller is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimedIdentity {
    pub user_id: i64,
    pub tenant_id: Option<TenantId>,
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl From<&Principal> for ClaimedIdentity {
    fn from(principal: &Principal) -> Self {
        Self {
            user_id: principal.id,
            tenant_id: principal.tenant_id,
            username: principal.username.clone(),
            email: principal.email.clone(),
            first_name: principal.first_name.clone(),
            last_name: principal.last_name.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayloadShape {
    Current {
        session_id: String,
        login_time: i64,
    },
    Legacy {
        session_id: Option<String>,
        login_time: Option<i64>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenPayload {
    pub identity: ClaimedIdentity,
    pub shape: PayloadShape,
    pub kind: Option<TokenKind>,
    /// `0` when the token predates version stamping.
    pub version: ProductVersion,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl TokenPayload {
    #[must_use]
    pub fn principal_id(&self) -> i64 {
        self.identity.user_id
    }

    #[must_use]
    pub fn tenant_id(&self) -> Option<TenantId> {
        self.identity.tenant_id
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match &self.shape {
            PayloadShape::Current { session_id, .. } => Some(session_id.as_str()),
            PayloadShape::Legacy { session_id, .. } => session_id.as_deref(),
        }
    }

    #[must_use]
    pub fn login_time(&self) -> Option<i64> {
        match &self.shape {
            PayloadShape::Current { login_time, .. } => Some(*login_time),
            PayloadShape::Legacy { login_time, .. } => *login_time,
        }
    }

    #[must_use]
    pub fn is_legacy(&self) -> bool {
        matches!(self.shape, PayloadShape::Legacy { .. })
    }
}

impl From<WireClaims> for TokenPayload {
    fn from(claims: WireClaims) -> Self {
        let shape = match (claims.jti, claims.login_time) {
            (Some(session_id), Some(login_time)) => PayloadShape::Current {
                session_id,
                login_time,
            },
            (session_id, login_time) => PayloadShape::Legacy {
                session_id,
                login_time,
            },
        };
        Self {
            identity: ClaimedIdentity {
                user_id: claims.user_id,
                tenant_id: claims.tenant_id.map(TenantId),
                username: claims.username,
                email: claims.email,
                first_name: claims.first_name,
                last_name: claims.last_name,
            },
            shape,
            kind: claims.typ,
            version: claims.ver.unwrap_or_else(ProductVersion::zero),
            issued_at: claims.iat,
            expires_at: claims.exp,
        }
    }
}
