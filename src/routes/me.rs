use axum::extract::State;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::DataResponse;
use crate::app::AppState;
use crate::auth::{MemberRole, TenantContext};
use crate::domain::contractors::{Contractor, ContractorResponse, CONTRACTOR_COLUMNS};
use crate::error::{ApiError, ApiResult};

#[derive(Serialize)]
pub struct MeResponse {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: MemberRole,
    pub contractor: ContractorResponse,
}

/// GET /api/me
pub async fn get_me(
    tenant: TenantContext,
    State(state): State<Arc<AppState>>,
) -> ApiResult<DataResponse<MeResponse>> {
    let contractor = sqlx::query_as::<_, Contractor>(&format!(
        "SELECT {} FROM contractors WHERE id = $1",
        CONTRACTOR_COLUMNS
    ))
    .bind(tenant.contractor_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Contractor not found"))?;

    Ok(DataResponse::new(MeResponse {
        user_id: tenant.user_id,
        email: tenant.email,
        role: tenant.role,
        contractor: contractor.into(),
    }))
}
