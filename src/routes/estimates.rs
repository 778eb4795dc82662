//! Estimate routes
//!
//! Drafts come from the AI and are adjusted by the contractor until sent.

use axum::extract::{Path, State};
use std::sync::Arc;
use uuid::Uuid;

use super::leads::{latest_takeoff, load_lead};
use crate::api::DataResponse;
use crate::app::AppState;
use crate::auth::{ensure_owned, TenantContext};
use crate::domain::contractors::{Contractor, CONTRACTOR_COLUMNS};
use crate::domain::estimates::{
    compute_totals, generate_public_token, validate_generated, EstimateResponse, EstimateRow,
    EstimateStatus, LineItemInput, UpdateEstimateRequest, ESTIMATE_COLUMNS,
};
use crate::domain::leads::{LeadRow, LeadStatus, LEAD_COLUMNS};
use crate::domain::payments::{PaymentResponse, PaymentRow, PAYMENT_COLUMNS};
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequestId;
use crate::services::rate_limiter::{RateLimitDecision, RateLimitPolicy};
use crate::validation::ValidatedJson;

pub(crate) async fn load_contractor(state: &AppState, contractor_id: Uuid) -> ApiResult<Contractor> {
    sqlx::query_as::<_, Contractor>(&format!(
        "SELECT {} FROM contractors WHERE id = $1",
        CONTRACTOR_COLUMNS
    ))
    .bind(contractor_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Contractor not found"))
}

async fn load_estimate(
    state: &AppState,
    tenant: &TenantContext,
    estimate_id: Uuid,
) -> ApiResult<EstimateRow> {
    let estimate = sqlx::query_as::<_, EstimateRow>(&format!(
        "SELECT {} FROM estimates WHERE id = $1",
        ESTIMATE_COLUMNS
    ))
    .bind(estimate_id)
    .fetch_optional(&state.db)
    .await?;

    ensure_owned(estimate, tenant.contractor_id, "Estimate")
}

/// POST /api/leads/:id/estimate
pub async fn generate_estimate(
    tenant: TenantContext,
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<Uuid>,
    request_id: RequestId,
) -> ApiResult<(RateLimitDecision, DataResponse<EstimateResponse>)> {
    let decision = state
        .rate_limiter
        .enforce(&RateLimitPolicy::AI, &tenant.rate_limit_id())
        .await?;

    let lead = load_lead(&state, &tenant, lead_id).await?;
    let takeoff = latest_takeoff(&state, lead.id)
        .await?
        .ok_or_else(|| ApiError::conflict("Lead must be analyzed before an estimate is generated"))?;
    let contractor = load_contractor(&state, tenant.contractor_id).await?;

    let generated = state
        .ai_client
        .generate_estimate(
            &lead.project_type,
            &takeoff.scope_of_work.0,
            &contractor.currency,
            request_id.as_deref(),
        )
        .await?;

    let items: Vec<LineItemInput> = generated.line_items.into_iter().map(Into::into).collect();
    let priced = validate_generated(&items)
        .and_then(|()| compute_totals(items, contractor.tax_rate, contractor.deposit_percent));
    let (line_items, totals) = match priced {
        Ok(priced) => priced,
        Err(errors) => {
            tracing::error!(lead_id = %lead.id, errors = %errors, "AI returned invalid line items");
            return Err(ApiError::external(
                "ai",
                format!("Generated estimate is invalid: {}", errors),
            ));
        }
    };
    let status = lead.status().advanced_to(LeadStatus::Estimated);

    let mut tx = state.db.begin().await?;

    let estimate = sqlx::query_as::<_, EstimateRow>(&format!(
        r#"
        INSERT INTO estimates (id, lead_id, contractor_id, takeoff_id, status, line_items,
                               subtotal, tax_rate, tax_amount, total, deposit_percent,
                               deposit_amount, currency, notes, public_token)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        RETURNING {}
        "#,
        ESTIMATE_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(lead.id)
    .bind(lead.contractor_id)
    .bind(takeoff.id)
    .bind(EstimateStatus::Draft.as_str())
    .bind(sqlx::types::Json(&line_items))
    .bind(totals.subtotal)
    .bind(contractor.tax_rate)
    .bind(totals.tax_amount)
    .bind(totals.total)
    .bind(contractor.deposit_percent)
    .bind(totals.deposit_amount)
    .bind(&contractor.currency)
    .bind(generated.notes.as_deref())
    .bind(generate_public_token())
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE leads SET status = $2, updated_at = now() WHERE id = $1")
        .bind(lead.id)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(
        lead_id = %lead.id,
        estimate_id = %estimate.id,
        line_items = estimate.line_items.0.len(),
        total = %estimate.total,
        "Estimate generated"
    );

    Ok((decision, DataResponse::new(estimate.into())))
}

/// GET /api/estimates/:id
pub async fn get_estimate(
    tenant: TenantContext,
    State(state): State<Arc<AppState>>,
    Path(estimate_id): Path<Uuid>,
) -> ApiResult<DataResponse<EstimateResponse>> {
    let estimate = load_estimate(&state, &tenant, estimate_id).await?;
    Ok(DataResponse::new(estimate.into()))
}

/// PATCH /api/estimates/:id
pub async fn update_estimate(
    tenant: TenantContext,
    State(state): State<Arc<AppState>>,
    Path(estimate_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateEstimateRequest>,
) -> ApiResult<(RateLimitDecision, DataResponse<EstimateResponse>)> {
    let decision = state
        .rate_limiter
        .enforce(&RateLimitPolicy::API, &tenant.rate_limit_id())
        .await?;

    let estimate = load_estimate(&state, &tenant, estimate_id).await?;
    if !estimate.status().is_editable() {
        return Err(ApiError::conflict(format!(
            "Estimate is {} and can no longer be edited",
            estimate.status().as_str()
        )));
    }

    let (line_items, totals) = match req.line_items {
        Some(items) => compute_totals(items, estimate.tax_rate, estimate.deposit_percent)?,
        None => {
            let items = estimate
                .line_items
                .0
                .iter()
                .map(|l| LineItemInput {
                    description: l.description.clone(),
                    quantity: l.quantity,
                    unit: l.unit.clone(),
                    unit_price: l.unit_price,
                })
                .collect();
            compute_totals(items, estimate.tax_rate, estimate.deposit_percent)?
        }
    };

    // Only drafts are updated
    let updated = sqlx::query_as::<_, EstimateRow>(&format!(
        r#"
        UPDATE estimates
        SET line_items = $2, subtotal = $3, tax_amount = $4, total = $5, deposit_amount = $6,
            notes = COALESCE($7, notes), valid_until = COALESCE($8, valid_until),
            updated_at = now()
        WHERE id = $1 AND status = 'DRAFT'
        RETURNING {}
        "#,
        ESTIMATE_COLUMNS
    ))
    .bind(estimate.id)
    .bind(sqlx::types::Json(&line_items))
    .bind(totals.subtotal)
    .bind(totals.tax_amount)
    .bind(totals.total)
    .bind(totals.deposit_amount)
    .bind(req.notes.as_deref())
    .bind(req.valid_until)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::conflict("Estimate can no longer be edited"))?;

    tracing::info!(estimate_id = %updated.id, total = %updated.total, "Estimate updated");

    Ok((decision, DataResponse::new(updated.into())))
}

/// POST /api/estimates/:id/send
pub async fn send_estimate(
    tenant: TenantContext,
    State(state): State<Arc<AppState>>,
    Path(estimate_id): Path<Uuid>,
) -> ApiResult<(RateLimitDecision, DataResponse<EstimateResponse>)> {
    let decision = state
        .rate_limiter
        .enforce(&RateLimitPolicy::API, &tenant.rate_limit_id())
        .await?;

    let estimate = load_estimate(&state, &tenant, estimate_id).await?;
    if estimate.status() != EstimateStatus::Draft {
        return Err(ApiError::conflict(format!(
            "Estimate is already {}",
            estimate.status().as_str()
        )));
    }

    let sent = sqlx::query_as::<_, EstimateRow>(&format!(
        r#"
        UPDATE estimates
        SET status = 'SENT', sent_at = now(), updated_at = now()
        WHERE id = $1 AND status = 'DRAFT'
        RETURNING {}
        "#,
        ESTIMATE_COLUMNS
    ))
    .bind(estimate.id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::conflict("Estimate was already sent"))?;

    let lead = sqlx::query_as::<_, LeadRow>(&format!(
        "SELECT {} FROM leads WHERE id = $1",
        LEAD_COLUMNS
    ))
    .bind(sent.lead_id)
    .fetch_one(&state.db)
    .await?;
    let contractor = load_contractor(&state, tenant.contractor_id).await?;

    state.email.send_in_background(state.email.estimate_ready(
        &lead.homeowner_email,
        &lead.homeowner_name,
        &contractor.name,
        sent.total,
        &sent.currency,
        &sent.public_token,
    ));

    tracing::info!(estimate_id = %sent.id, lead_id = %lead.id, "Estimate sent");

    Ok((decision, DataResponse::new(sent.into())))
}

/// GET /api/estimates/:id/payments
pub async fn list_payments(
    tenant: TenantContext,
    State(state): State<Arc<AppState>>,
    Path(estimate_id): Path<Uuid>,
) -> ApiResult<DataResponse<Vec<PaymentResponse>>> {
    let estimate = load_estimate(&state, &tenant, estimate_id).await?;

    let payments = sqlx::query_as::<_, PaymentRow>(&format!(
        "SELECT {} FROM payments WHERE estimate_id = $1 ORDER BY created_at DESC",
        PAYMENT_COLUMNS
    ))
    .bind(estimate.id)
    .fetch_all(&state.db)
    .await?;

    Ok(DataResponse::new(
        payments.into_iter().map(Into::into).collect(),
    ))
}
