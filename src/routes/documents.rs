//! Document and upload routes
//!
//! Files never pass through the API. Clients receive a presigned PUT URL or a
//! signed POST form, upload directly to object storage, then register the key.

use axum::extract::{Path, State};
use std::sync::Arc;
use uuid::Uuid;

use super::leads::load_lead;
use crate::api::DataResponse;
use crate::app::AppState;
use crate::auth::TenantContext;
use crate::domain::contractors::{Contractor, CONTRACTOR_COLUMNS};
use crate::domain::documents::{
    CompleteDocumentRequest, DocumentResponse, DocumentRow, FileType, IntakeUploadRequest,
    PresignUploadRequest, PresignedUploadResponse, DOCUMENT_COLUMNS,
};
use crate::error::{is_unique_violation, ApiError, ApiResult};
use crate::middleware::{IntakeUpload, IpRateLimit};
use crate::services::rate_limiter::{RateLimitDecision, RateLimitPolicy};
use crate::services::storage::{build_key, key_in_scope, KeyScope};
use crate::validation::ValidatedJson;

/// GET /api/leads/:id/documents
pub async fn list_documents(
    tenant: TenantContext,
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<Uuid>,
) -> ApiResult<DataResponse<Vec<DocumentResponse>>> {
    let lead = load_lead(&state, &tenant, lead_id).await?;

    let documents = sqlx::query_as::<_, DocumentRow>(&format!(
        "SELECT {} FROM documents WHERE lead_id = $1 ORDER BY created_at DESC",
        DOCUMENT_COLUMNS
    ))
    .bind(lead.id)
    .fetch_all(&state.db)
    .await?;

    Ok(DataResponse::new(
        documents.into_iter().map(Into::into).collect(),
    ))
}

/// POST /api/leads/:id/documents
///
/// Presign an upload under the lead's prefix.
pub async fn presign_document(
    tenant: TenantContext,
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<PresignUploadRequest>,
) -> ApiResult<(RateLimitDecision, DataResponse<PresignedUploadResponse>)> {
    let decision = state
        .rate_limiter
        .enforce(&RateLimitPolicy::API, &tenant.rate_limit_id())
        .await?;

    let lead = load_lead(&state, &tenant, lead_id).await?;
    let key = build_key(
        lead.contractor_id,
        KeyScope::Lead(lead.id),
        req.file_type,
        &req.file_name,
    );

    let upload = state
        .storage
        .presign_upload(key, req.file_type, &req.content_type, req.size_bytes, req.method)
        .await?;

    tracing::debug!(lead_id = %lead.id, storage_key = %upload.storage_key, "Upload presigned");

    Ok((decision, DataResponse::new(upload)))
}

/// POST /api/leads/:id/documents/complete
///
/// Register an object uploaded with a presigned URL.
pub async fn complete_document(
    tenant: TenantContext,
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<CompleteDocumentRequest>,
) -> ApiResult<(RateLimitDecision, DataResponse<DocumentResponse>)> {
    let decision = state
        .rate_limiter
        .enforce(&RateLimitPolicy::API, &tenant.rate_limit_id())
        .await?;

    let lead = load_lead(&state, &tenant, lead_id).await?;
    if !key_in_scope(
        &req.storage_key,
        lead.contractor_id,
        KeyScope::Lead(lead.id),
        req.file_type,
    ) {
        return Err(ApiError::invalid_field(
            "storage_key",
            "was not issued for this lead",
        ));
    }
    state.storage.check_size(req.file_type, req.size_bytes)?;

    let document = sqlx::query_as::<_, DocumentRow>(&format!(
        r#"
        INSERT INTO documents (id, lead_id, contractor_id, uploaded_by, storage_key, file_name,
                               content_type, size_bytes, file_type)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {}
        "#,
        DOCUMENT_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(lead.id)
    .bind(lead.contractor_id)
    .bind(tenant.user_id)
    .bind(&req.storage_key)
    .bind(req.file_name.trim())
    .bind(&req.content_type)
    .bind(req.size_bytes)
    .bind(req.file_type.as_str())
    .fetch_one(&state.db)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::conflict("Document is already registered")
        } else {
            ApiError::from(e)
        }
    })?;

    tracing::info!(
        lead_id = %lead.id,
        document_id = %document.id,
        file_type = req.file_type.as_str(),
        "Document registered"
    );

    Ok((decision, DataResponse::new(document.into())))
}

/// POST /api/intake/:slug/uploads
///
/// Presigned photo upload for the public intake form.
pub async fn presign_intake_upload(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    limit: IpRateLimit<IntakeUpload>,
    ValidatedJson(req): ValidatedJson<IntakeUploadRequest>,
) -> ApiResult<(RateLimitDecision, DataResponse<PresignedUploadResponse>)> {
    let contractor = sqlx::query_as::<_, Contractor>(&format!(
        "SELECT {} FROM contractors WHERE slug = $1",
        CONTRACTOR_COLUMNS
    ))
    .bind(slug.trim())
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Contractor not found"))?;

    let key = build_key(contractor.id, KeyScope::Intake, FileType::Photo, &req.file_name);
    let upload = state
        .storage
        .presign_upload(key, FileType::Photo, &req.content_type, req.size_bytes, req.method)
        .await?;

    tracing::debug!(
        contractor_id = %contractor.id,
        client_ip = %limit.client_ip.0,
        "Intake upload presigned"
    );

    Ok((limit.decision, DataResponse::new(upload)))
}
