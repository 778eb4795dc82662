//! Unauthenticated estimate link
//!
//! The public token is the only credential. Drafts are never visible.

use axum::extract::{Path, State};
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::api::DataResponse;
use crate::app::AppState;
use crate::domain::estimates::{EstimateRow, EstimateStatus, PublicEstimateResponse, ESTIMATE_COLUMNS};
use crate::error::{ApiError, ApiResult};
use crate::middleware::{Checkout, IpRateLimit};
use crate::services::rate_limiter::RateLimitDecision;

async fn published_estimate(state: &AppState, token: &str) -> ApiResult<EstimateRow> {
    sqlx::query_as::<_, EstimateRow>(&format!(
        "SELECT {} FROM estimates WHERE public_token = $1",
        ESTIMATE_COLUMNS
    ))
    .bind(token)
    .fetch_optional(&state.db)
    .await?
    .filter(|e| e.status().is_published())
    .ok_or_else(|| ApiError::not_found("Estimate not found"))
}

async fn public_view(state: &AppState, estimate: EstimateRow) -> ApiResult<PublicEstimateResponse> {
    let (contractor_name, homeowner_name, project_type): (String, String, String) =
        sqlx::query_as(
            r#"
            SELECT c.name, l.homeowner_name, l.project_type
            FROM leads l
            JOIN contractors c ON c.id = l.contractor_id
            WHERE l.id = $1
            "#,
        )
        .bind(estimate.lead_id)
        .fetch_one(&state.db)
        .await?;

    let amount_paid: Decimal = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE estimate_id = $1 AND status = 'COMPLETED'",
    )
    .bind(estimate.id)
    .fetch_one(&state.db)
    .await?;

    Ok(PublicEstimateResponse {
        status: estimate.status(),
        id: estimate.id,
        contractor_name,
        homeowner_name,
        project_type,
        line_items: estimate.line_items.0,
        subtotal: estimate.subtotal,
        tax_amount: estimate.tax_amount,
        total: estimate.total,
        deposit_amount: estimate.deposit_amount,
        amount_paid,
        currency: estimate.currency,
        notes: estimate.notes,
        valid_until: estimate.valid_until,
    })
}

/// GET /api/public/estimates/:token
pub async fn get_public_estimate(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> ApiResult<DataResponse<PublicEstimateResponse>> {
    let estimate = published_estimate(&state, &token).await?;
    Ok(DataResponse::new(public_view(&state, estimate).await?))
}

/// POST /api/public/estimates/:token/accept
///
/// SENT → ACCEPTED. Accepting twice returns the accepted estimate.
pub async fn accept_estimate(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    limit: IpRateLimit<Checkout>,
) -> ApiResult<(RateLimitDecision, DataResponse<PublicEstimateResponse>)> {
    let accepted = sqlx::query_as::<_, EstimateRow>(&format!(
        r#"
        UPDATE estimates
        SET status = 'ACCEPTED', accepted_at = now(), updated_at = now()
        WHERE public_token = $1 AND status = 'SENT'
        RETURNING {}
        "#,
        ESTIMATE_COLUMNS
    ))
    .bind(&token)
    .fetch_optional(&state.db)
    .await?;

    let estimate = match accepted {
        Some(estimate) => {
            tracing::info!(
                estimate_id = %estimate.id,
                client_ip = %limit.client_ip.0,
                "Estimate accepted"
            );
            estimate
        }
        None => {
            let estimate = published_estimate(&state, &token).await?;
            if estimate.status() != EstimateStatus::Accepted {
                return Err(ApiError::conflict("Estimate cannot be accepted"));
            }
            estimate
        }
    };

    Ok((limit.decision, DataResponse::new(public_view(&state, estimate).await?)))
}
