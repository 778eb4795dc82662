//! Lead routes
//!
//! Public intake plus the contractor's lead inbox.

use axum::extract::{Path, State};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{DataResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::{ensure_owned, TenantContext};
use crate::domain::contractors::{Contractor, CONTRACTOR_COLUMNS};
use crate::domain::documents::FileType;
use crate::domain::leads::{
    CreateLeadRequest, CreateLeadResponse, LeadDetailResponse, LeadListQuery, LeadResponse,
    LeadRow, PhotoRow, UpdateLeadRequest, LEAD_COLUMNS, PHOTO_COLUMNS,
};
use crate::domain::takeoffs::{TakeoffRow, TAKEOFF_COLUMNS};
use crate::error::{is_unique_violation, ApiError, ApiResult};
use crate::middleware::{Intake, IpRateLimit};
use crate::services::rate_limiter::{RateLimitDecision, RateLimitPolicy};
use crate::services::storage::{key_in_scope, KeyScope};
use crate::validation::{ValidatedJson, ValidatedQuery, ValidationErrors};

/// Fetch a lead and check it belongs to the caller's tenant
pub(crate) async fn load_lead(
    state: &AppState,
    tenant: &TenantContext,
    lead_id: Uuid,
) -> ApiResult<LeadRow> {
    let lead = sqlx::query_as::<_, LeadRow>(&format!(
        "SELECT {} FROM leads WHERE id = $1",
        LEAD_COLUMNS
    ))
    .bind(lead_id)
    .fetch_optional(&state.db)
    .await?;

    ensure_owned(lead, tenant.contractor_id, "Lead")
}

pub(crate) async fn load_photos(state: &AppState, lead_id: Uuid) -> ApiResult<Vec<PhotoRow>> {
    let photos = sqlx::query_as::<_, PhotoRow>(&format!(
        "SELECT {} FROM photos WHERE lead_id = $1 ORDER BY created_at, id",
        PHOTO_COLUMNS
    ))
    .bind(lead_id)
    .fetch_all(&state.db)
    .await?;
    Ok(photos)
}

pub(crate) async fn latest_takeoff(
    state: &AppState,
    lead_id: Uuid,
) -> ApiResult<Option<TakeoffRow>> {
    let takeoff = sqlx::query_as::<_, TakeoffRow>(&format!(
        "SELECT {} FROM takeoffs WHERE lead_id = $1 ORDER BY created_at DESC LIMIT 1",
        TAKEOFF_COLUMNS
    ))
    .bind(lead_id)
    .fetch_optional(&state.db)
    .await?;
    Ok(takeoff)
}

/// Intake photos must have been presigned for this contractor and be within the size limit
fn check_intake_photos(
    req: &CreateLeadRequest,
    contractor_id: Uuid,
    max_photo_bytes: u64,
) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    let mut seen = HashSet::new();

    for (i, photo) in req.photos.iter().enumerate() {
        let field = |name: &str| format!("photos[{}].{}", i, name);
        if !key_in_scope(&photo.storage_key, contractor_id, KeyScope::Intake, FileType::Photo) {
            errors.add(&field("storage_key"), "was not issued for this contractor");
        } else if !seen.insert(photo.storage_key.as_str()) {
            errors.add(&field("storage_key"), "is attached more than once");
        }
        if photo.size_bytes as u64 > max_photo_bytes {
            errors.add(
                &field("size_bytes"),
                format!("must be at most {} bytes", max_photo_bytes),
            );
        }
    }

    errors.into_result()
}

/// A photo key can belong to one lead only
fn photo_insert_error(index: usize, err: sqlx::Error) -> ApiError {
    if is_unique_violation(&err) {
        ApiError::invalid_field(
            &format!("photos[{}].storage_key", index),
            "is already attached to another lead",
        )
    } else {
        ApiError::from(err)
    }
}

/// POST /api/leads
///
/// Public intake form submission.
pub async fn create_lead(
    State(state): State<Arc<AppState>>,
    limit: IpRateLimit<Intake>,
    ValidatedJson(req): ValidatedJson<CreateLeadRequest>,
) -> ApiResult<(RateLimitDecision, DataResponse<CreateLeadResponse>)> {
    let contractor = sqlx::query_as::<_, Contractor>(&format!(
        "SELECT {} FROM contractors WHERE slug = $1",
        CONTRACTOR_COLUMNS
    ))
    .bind(req.contractor_slug.trim())
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Contractor not found"))?;

    check_intake_photos(&req, contractor.id, state.settings.storage_max_photo_bytes)?;

    let phone = req
        .homeowner_phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());

    let mut tx = state.db.begin().await?;

    let lead = sqlx::query_as::<_, LeadRow>(&format!(
        r#"
        INSERT INTO leads (id, contractor_id, homeowner_name, homeowner_email, homeowner_phone,
                           address, project_type, description, budget_min, budget_max, timeline)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING {}
        "#,
        LEAD_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(contractor.id)
    .bind(req.homeowner_name.trim())
    .bind(req.homeowner_email.trim().to_lowercase())
    .bind(phone)
    .bind(req.address.as_deref().map(str::trim))
    .bind(req.project_type.trim())
    .bind(req.description.trim())
    .bind(req.budget_min)
    .bind(req.budget_max)
    .bind(req.timeline.as_deref())
    .fetch_one(&mut *tx)
    .await?;

    let mut photos = Vec::with_capacity(req.photos.len());
    for (i, photo) in req.photos.iter().enumerate() {
        let row = sqlx::query_as::<_, PhotoRow>(&format!(
            r#"
            INSERT INTO photos (id, lead_id, storage_key, file_name, content_type, size_bytes)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            PHOTO_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(lead.id)
        .bind(&photo.storage_key)
        .bind(photo.file_name.trim())
        .bind(&photo.content_type)
        .bind(photo.size_bytes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| photo_insert_error(i, e))?;
        photos.push(row);
    }

    tx.commit().await?;

    tracing::info!(
        lead_id = %lead.id,
        contractor_id = %contractor.id,
        photos = photos.len(),
        client_ip = %limit.client_ip.0,
        "Lead created"
    );

    state.email.send_in_background(state.email.new_lead(
        &contractor.email,
        lead.id,
        &lead.homeowner_name,
        &lead.project_type,
        &lead.description,
    ));

    Ok((
        limit.decision,
        DataResponse::new(CreateLeadResponse {
            lead: lead.into(),
            photos,
        }),
    ))
}

/// GET /api/leads
pub async fn list_leads(
    tenant: TenantContext,
    State(state): State<Arc<AppState>>,
    ValidatedQuery(query): ValidatedQuery<LeadListQuery>,
) -> ApiResult<Paginated<LeadResponse>> {
    let pagination = PaginationParams::new(query.page, query.per_page);
    let status = query.status.map(|s| s.as_str());

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM leads WHERE contractor_id = $1 AND ($2::text IS NULL OR status = $2)",
    )
    .bind(tenant.contractor_id)
    .bind(status)
    .fetch_one(&state.db)
    .await?;

    let leads = sqlx::query_as::<_, LeadRow>(&format!(
        r#"
        SELECT {}
        FROM leads
        WHERE contractor_id = $1 AND ($2::text IS NULL OR status = $2)
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#,
        LEAD_COLUMNS
    ))
    .bind(tenant.contractor_id)
    .bind(status)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.db)
    .await?;

    let data = leads.into_iter().map(Into::into).collect();
    Ok(Paginated::new(data, &pagination, total.max(0) as u64))
}

/// GET /api/leads/:id
pub async fn get_lead(
    tenant: TenantContext,
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<Uuid>,
) -> ApiResult<DataResponse<LeadDetailResponse>> {
    let lead = load_lead(&state, &tenant, lead_id).await?;
    let photos = load_photos(&state, lead.id).await?;
    let latest_takeoff = latest_takeoff(&state, lead.id).await?;

    Ok(DataResponse::new(LeadDetailResponse {
        lead: lead.into(),
        photos,
        latest_takeoff: latest_takeoff.map(Into::into),
    }))
}

/// PATCH /api/leads/:id
///
/// Status moves forward only; repeating the current status is a no-op.
pub async fn update_lead(
    tenant: TenantContext,
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateLeadRequest>,
) -> ApiResult<(RateLimitDecision, DataResponse<LeadResponse>)> {
    let decision = state
        .rate_limiter
        .enforce(&RateLimitPolicy::API, &tenant.rate_limit_id())
        .await?;

    let lead = load_lead(&state, &tenant, lead_id).await?;
    let current = lead.status();

    if !current.can_transition_to(req.status) {
        return Err(ApiError::conflict(format!(
            "Lead cannot move from {} to {}",
            current.as_str(),
            req.status.as_str()
        )));
    }
    if current == req.status {
        return Ok((decision, DataResponse::new(lead.into())));
    }

    let updated = sqlx::query_as::<_, LeadRow>(&format!(
        "UPDATE leads SET status = $2, updated_at = now() WHERE id = $1 RETURNING {}",
        LEAD_COLUMNS
    ))
    .bind(lead.id)
    .bind(req.status.as_str())
    .fetch_one(&state.db)
    .await?;

    tracing::info!(
        lead_id = %lead.id,
        contractor_id = %tenant.contractor_id,
        from = current.as_str(),
        to = req.status.as_str(),
        "Lead status updated"
    );

    Ok((decision, DataResponse::new(updated.into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::leads::IntakePhoto;
    use crate::services::storage::build_key;

    fn request(photos: Vec<IntakePhoto>) -> CreateLeadRequest {
        CreateLeadRequest {
            contractor_slug: "acme".to_string(),
            homeowner_name: "Dana".to_string(),
            homeowner_email: "dana@example.com".to_string(),
            homeowner_phone: None,
            address: None,
            project_type: "roof_repair".to_string(),
            description: "Leak over the garage".to_string(),
            budget_min: None,
            budget_max: None,
            timeline: None,
            photos,
        }
    }

    fn photo(key: String) -> IntakePhoto {
        IntakePhoto {
            storage_key: key,
            file_name: "roof.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            size_bytes: 1024,
        }
    }

    #[test]
    fn intake_photos_must_belong_to_contractor() {
        let contractor = Uuid::new_v4();
        let own = build_key(contractor, KeyScope::Intake, FileType::Photo, "a.jpg");
        let foreign = build_key(Uuid::new_v4(), KeyScope::Intake, FileType::Photo, "b.jpg");

        assert!(check_intake_photos(&request(vec![photo(own.clone())]), contractor, 4096).is_ok());

        let errors =
            check_intake_photos(&request(vec![photo(own), photo(foreign)]), contractor, 4096)
                .unwrap_err();
        assert!(errors.contains("photos[1].storage_key"));
        assert!(!errors.contains("photos[0].storage_key"));
    }

    #[test]
    fn duplicate_and_oversized_photos_are_rejected() {
        let contractor = Uuid::new_v4();
        let key = build_key(contractor, KeyScope::Intake, FileType::Photo, "a.jpg");
        let errors = check_intake_photos(
            &request(vec![photo(key.clone()), photo(key)]),
            contractor,
            512,
        )
        .unwrap_err();
        assert!(errors.contains("photos[1].storage_key"));
        assert!(errors.contains("photos[0].size_bytes"));
    }

    #[test]
    fn reused_photo_key_is_a_validation_error() {
        let envelope = photo_insert_error(2, crate::error::unique_violation()).to_envelope();
        assert_eq!(envelope.error.status_code, 422);
        let details = envelope.error.details.unwrap();
        assert!(details.get("photos[2].storage_key").is_some());

        let other = photo_insert_error(0, sqlx::Error::RowNotFound);
        assert_eq!(other.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
