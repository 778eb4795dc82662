//! Homeowner checkout
//!
//! The public token authorizes the caller. The amount is computed and the
//! PENDING payment inserted while the estimate row is locked.

use axum::extract::{Path, State};
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::DataResponse;
use crate::app::AppState;
use crate::domain::estimates::{public_token_matches, EstimateRow, ESTIMATE_COLUMNS};
use crate::domain::payments::{
    checkout_amount, to_minor_units, CheckoutRequest, CheckoutResponse, PaymentRow, PaymentStatus,
    CHECKOUT_SESSION_TTL_MINUTES, PAYMENT_COLUMNS,
};
use crate::error::{ApiError, ApiResult};
use crate::middleware::{Checkout, IpRateLimit};
use crate::services::payments::CheckoutParams;
use crate::services::rate_limiter::RateLimitDecision;
use crate::validation::ValidatedJson;

/// POST /api/estimates/:id/checkout
pub async fn create_checkout(
    State(state): State<Arc<AppState>>,
    Path(estimate_id): Path<Uuid>,
    limit: IpRateLimit<Checkout>,
    ValidatedJson(req): ValidatedJson<CheckoutRequest>,
) -> ApiResult<(RateLimitDecision, DataResponse<CheckoutResponse>)> {
    let mut tx = state.db.begin().await?;

    let estimate = sqlx::query_as::<_, EstimateRow>(&format!(
        "SELECT {} FROM estimates WHERE id = $1 FOR UPDATE",
        ESTIMATE_COLUMNS
    ))
    .bind(estimate_id)
    .fetch_optional(&mut *tx)
    .await?
    .filter(|e| public_token_matches(&e.public_token, &req.token))
    .ok_or_else(|| ApiError::not_found("Estimate not found"))?;

    if !estimate.status().is_published() {
        return Err(ApiError::conflict("Estimate has not been sent yet"));
    }

    let payments = sqlx::query_as::<_, PaymentRow>(&format!(
        "SELECT {} FROM payments WHERE estimate_id = $1",
        PAYMENT_COLUMNS
    ))
    .bind(estimate.id)
    .fetch_all(&mut *tx)
    .await?;

    let amount = checkout_amount(
        req.payment_type,
        estimate.total,
        estimate.deposit_amount,
        &payments,
        Utc::now(),
    )
    .map_err(|blocked| ApiError::conflict(blocked.message()))?;
    let amount_minor = to_minor_units(amount)
        .ok_or_else(|| ApiError::internal(format!("Amount out of range: {}", amount)))?;

    let payment_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO payments (id, estimate_id, contractor_id, payment_type, amount, currency, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(payment_id)
    .bind(estimate.id)
    .bind(estimate.contractor_id)
    .bind(req.payment_type.as_str())
    .bind(amount)
    .bind(&estimate.currency)
    .bind(PaymentStatus::Pending.as_str())
    .execute(&mut *tx)
    .await?;

    let (contractor_name, homeowner_email): (String, String) = sqlx::query_as(
        r#"
        SELECT c.name, l.homeowner_email
        FROM leads l
        JOIN contractors c ON c.id = l.contractor_id
        WHERE l.id = $1
        "#,
    )
    .bind(estimate.lead_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    let params = CheckoutParams {
        payment_id,
        estimate_id: estimate.id,
        payment_type: req.payment_type,
        amount_minor,
        currency: &estimate.currency,
        product_name: format!("{} for estimate from {}", req.payment_type.label(), contractor_name),
        customer_email: Some(homeowner_email.as_str()),
        public_token: &estimate.public_token,
        expires_at: (Utc::now() + Duration::minutes(CHECKOUT_SESSION_TTL_MINUTES)).timestamp(),
    };

    let session = match state.payments.create_checkout_session(&params).await {
        Ok(session) => session,
        Err(e) => {
            sqlx::query("UPDATE payments SET status = 'FAILED' WHERE id = $1 AND status = 'PENDING'")
                .bind(payment_id)
                .execute(&state.db)
                .await?;
            return Err(e);
        }
    };
    let url = session
        .url
        .clone()
        .ok_or_else(|| ApiError::external("stripe", "Checkout session has no URL"))?;

    sqlx::query("UPDATE payments SET checkout_session_id = $2 WHERE id = $1")
        .bind(payment_id)
        .bind(&session.id)
        .execute(&state.db)
        .await?;

    tracing::info!(
        estimate_id = %estimate.id,
        payment_id = %payment_id,
        payment_type = req.payment_type.as_str(),
        amount = %amount,
        client_ip = %limit.client_ip.0,
        "Checkout session created"
    );

    Ok((
        limit.decision,
        DataResponse::new(CheckoutResponse {
            url,
            session_id: session.id,
            payment_id,
            amount,
            currency: estimate.currency,
        }),
    ))
}
