//! Tenant resolution and ownership checks.
//!
//! A verified user maps to exactly one contractor through `contractor_users`.
//! Every lead, estimate and payment carries a `contractor_id`; access is
//! granted only when it matches the caller's tenant.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::RequireAuth;
use crate::app::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberRole {
    Owner,
    Member,
}

impl MemberRole {
    pub fn from_db(s: &str) -> Self {
        match s {
            "OWNER" => Self::Owner,
            _ => Self::Member,
        }
    }
}

/// Authenticated caller resolved to a contractor tenant
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub contractor_id: Uuid,
    pub role: MemberRole,
}

impl TenantContext {
    /// Identifier for user-keyed rate limits
    pub fn rate_limit_id(&self) -> String {
        format!("user:{}", self.user_id)
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for TenantContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let RequireAuth(auth) = RequireAuth::from_request_parts(parts, state).await?;

        let membership: Option<(Uuid, String)> = sqlx::query_as(
            "SELECT contractor_id, role FROM contractor_users WHERE auth_user_id = $1 LIMIT 1",
        )
        .bind(auth.user_id)
        .fetch_optional(&state.db)
        .await?;

        let (contractor_id, role) = membership.ok_or_else(|| {
            tracing::warn!(user_id = %auth.user_id, "No contractor linked to user");
            ApiError::forbidden("No contractor account is linked to this user")
        })?;

        Ok(TenantContext {
            user_id: auth.user_id,
            email: auth.email,
            contractor_id,
            role: MemberRole::from_db(&role),
        })
    }
}

/// Resources partitioned by contractor
pub trait TenantOwned {
    fn contractor_id(&self) -> Uuid;
}

/// Missing resources are 404, resources of another tenant are 403
pub fn ensure_owned<T: TenantOwned>(
    resource: Option<T>,
    tenant_id: Uuid,
    kind: &str,
) -> ApiResult<T> {
    let resource = resource.ok_or_else(|| ApiError::not_found(format!("{} not found", kind)))?;

    if resource.contractor_id() != tenant_id {
        tracing::warn!(
            tenant_id = %tenant_id,
            owner_id = %resource.contractor_id(),
            resource = kind,
            "Cross-tenant access denied"
        );
        return Err(ApiError::forbidden(format!(
            "You do not have access to this {}",
            kind.to_lowercase()
        )));
    }

    Ok(resource)
}
