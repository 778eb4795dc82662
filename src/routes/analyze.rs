//! Photo analysis pipeline
//!
//! Presign every lead photo, fan out to the AI service, aggregate the
//! successful analyses, generate a scope of work and persist one takeoff.

use axum::extract::{Path, State};
use futures::future::join_all;
use sqlx::types::Json;
use std::sync::Arc;
use uuid::Uuid;

use super::leads::{load_lead, load_photos};
use crate::api::DataResponse;
use crate::app::AppState;
use crate::auth::TenantContext;
use crate::domain::ai::PhotoAnalysis;
use crate::domain::leads::{LeadStatus, PhotoRow};
use crate::domain::takeoffs::{
    aggregate, score_lead, AnalyzeResponse, ScoreInputs, TakeoffRow, TAKEOFF_COLUMNS,
};
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequestId;
use crate::services::rate_limiter::{RateLimitDecision, RateLimitPolicy};

async fn analyze_one(
    state: &AppState,
    photo: &PhotoRow,
    project_type: &str,
    description: &str,
    request_id: Option<&str>,
) -> ApiResult<PhotoAnalysis> {
    let image_url = state.storage.presign_get(&photo.storage_key).await?;
    state
        .ai_client
        .analyze_photo(&image_url, project_type, description, request_id)
        .await
}

/// POST /api/leads/:id/analyze
pub async fn analyze_lead(
    tenant: TenantContext,
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<Uuid>,
    request_id: RequestId,
) -> ApiResult<(RateLimitDecision, DataResponse<AnalyzeResponse>)> {
    let decision = state
        .rate_limiter
        .enforce(&RateLimitPolicy::AI, &tenant.rate_limit_id())
        .await?;

    let lead = load_lead(&state, &tenant, lead_id).await?;
    let photos = load_photos(&state, lead.id).await?;
    if photos.is_empty() {
        return Err(ApiError::invalid_field(
            "photos",
            "lead has no photos to analyze",
        ));
    }

    let request_id = request_id.as_deref();
    let results = join_all(photos.iter().map(|photo| {
        analyze_one(
            &state,
            photo,
            &lead.project_type,
            &lead.description,
            request_id,
        )
    }))
    .await;

    let mut analyses = Vec::with_capacity(results.len());
    for (photo, result) in photos.iter().zip(results) {
        match result {
            Ok(analysis) => analyses.push(analysis),
            Err(e) => tracing::warn!(
                lead_id = %lead.id,
                photo_id = %photo.id,
                error = %e,
                "Photo analysis failed"
            ),
        }
    }

    if analyses.is_empty() {
        return Err(ApiError::external(
            "ai",
            format!("All {} photo analyses failed", photos.len()),
        ));
    }

    let summary = aggregate(&analyses);
    let scope = state
        .ai_client
        .generate_scope(&lead.project_type, &lead.description, &summary, request_id)
        .await?;
    let score = score_lead(&ScoreInputs::new(&lead, &summary));
    let status = lead.status().advanced_to(LeadStatus::Qualified);

    let mut tx = state.db.begin().await?;

    let takeoff = sqlx::query_as::<_, TakeoffRow>(&format!(
        r#"
        INSERT INTO takeoffs (id, lead_id, contractor_id, photo_analyses, aggregate, scope_of_work, score)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {}
        "#,
        TAKEOFF_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(lead.id)
    .bind(lead.contractor_id)
    .bind(Json(&analyses))
    .bind(Json(&summary))
    .bind(Json(&scope))
    .bind(score)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE leads SET score = $2, status = $3, updated_at = now() WHERE id = $1")
        .bind(lead.id)
        .bind(score)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(
        lead_id = %lead.id,
        takeoff_id = %takeoff.id,
        analyzed = analyses.len(),
        failed = photos.len() - analyses.len(),
        score,
        "Lead analyzed"
    );

    Ok((
        decision,
        DataResponse::new(AnalyzeResponse {
            takeoff: takeoff.into(),
            score,
        }),
    ))
}
