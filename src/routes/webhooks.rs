//! Stripe webhook receiver
//!
//! Deliveries may repeat or race. Every transition is guarded on the payment
//! still being PENDING, under the same estimate lock checkout takes.

use axum::{body::Bytes, extract::State, http::HeaderMap};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::DataResponse;
use crate::app::AppState;
use crate::domain::estimates::EstimateStatus;
use crate::domain::payments::{
    settles_as, PaymentRow, PaymentStatus, PaymentType, PAYMENT_COLUMNS,
};
use crate::error::{ApiError, ApiResult};
use crate::services::payments::{SessionObject, StripeEvent};

const STRIPE_SIGNATURE: &str = "stripe-signature";

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

/// POST /api/webhooks/stripe
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<DataResponse<WebhookAck>> {
    let signature = headers
        .get(STRIPE_SIGNATURE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing Stripe-Signature header"))?;

    state
        .payments
        .verify_webhook(&body, signature)
        .map_err(|e| {
            tracing::warn!(error = %e, "Rejected webhook signature");
            ApiError::unauthorized("Invalid webhook signature")
        })?;

    let event: StripeEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::invalid_field("body", format!("is not a valid event: {}", e)))?;

    match event.event_type.as_str() {
        "checkout.session.completed" => {
            if event.data.object.payment_status.as_deref() == Some("unpaid") {
                tracing::info!(event_id = %event.id, "Checkout completed without payment; waiting");
            } else {
                complete_payment(&state, &event.data.object).await?;
            }
        }
        "checkout.session.async_payment_succeeded" => {
            complete_payment(&state, &event.data.object).await?;
        }
        "checkout.session.expired" | "checkout.session.async_payment_failed" => {
            fail_payment(&state, &event.data.object).await?;
        }
        other => {
            tracing::debug!(event_id = %event.id, event_type = other, "Ignoring webhook event");
        }
    }

    Ok(DataResponse::new(WebhookAck { received: true }))
}

fn session_payment_id(session: &SessionObject) -> Option<Uuid> {
    let id = session.payment_id();
    if id.is_none() {
        tracing::warn!(session_id = %session.id, "Checkout session carries no payment id");
    }
    id
}

async fn complete_payment(state: &AppState, session: &SessionObject) -> ApiResult<()> {
    let Some(payment_id) = session_payment_id(session) else {
        return Ok(());
    };

    let mut tx = state.db.begin().await?;

    let estimate: Option<(Uuid, String, Uuid, Decimal)> = sqlx::query_as(
        r#"
        SELECT e.id, e.status, e.lead_id, e.total
        FROM estimates e
        JOIN payments p ON p.estimate_id = e.id
        WHERE p.id = $1
        FOR UPDATE OF e
        "#,
    )
    .bind(payment_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((estimate_id, estimate_status, lead_id, estimate_total)) = estimate else {
        tracing::warn!(payment_id = %payment_id, "Webhook for unknown payment");
        return Ok(());
    };

    let payments = sqlx::query_as::<_, PaymentRow>(&format!(
        "SELECT {} FROM payments WHERE estimate_id = $1",
        PAYMENT_COLUMNS
    ))
    .bind(estimate_id)
    .fetch_all(&mut *tx)
    .await?;

    let Some(pending) = payments
        .iter()
        .find(|p| p.id == payment_id && PaymentStatus::from_db(&p.status) == PaymentStatus::Pending)
    else {
        tracing::info!(payment_id = %payment_id, "Payment already settled; duplicate delivery");
        return Ok(());
    };
    let settled = settles_as(pending, estimate_total, &payments);

    let payment = sqlx::query_as::<_, PaymentRow>(&format!(
        r#"
        UPDATE payments
        SET status = $3, completed_at = now(),
            checkout_session_id = COALESCE(checkout_session_id, $2)
        WHERE id = $1 AND status = 'PENDING'
        RETURNING {}
        "#,
        PAYMENT_COLUMNS
    ))
    .bind(payment_id)
    .bind(&session.id)
    .bind(settled.as_str())
    .fetch_one(&mut *tx)
    .await?;

    if settled == PaymentStatus::Duplicate {
        tx.commit().await?;
        tracing::error!(
            payment_id = %payment.id,
            estimate_id = %estimate_id,
            amount = %payment.amount,
            "Payment captured for an estimate that no longer owes it; refund required"
        );
        return Ok(());
    }

    let payment_type = PaymentType::from_db(&payment.payment_type);
    if payment_type == PaymentType::Deposit
        && EstimateStatus::from_db(&estimate_status) == EstimateStatus::Sent
    {
        sqlx::query(
            r#"
            UPDATE estimates
            SET status = 'ACCEPTED', accepted_at = COALESCE(accepted_at, now()), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(estimate_id)
        .execute(&mut *tx)
        .await?;
    }

    let (contractor_email, homeowner_name): (String, String) = sqlx::query_as(
        r#"
        SELECT c.email, l.homeowner_name
        FROM leads l
        JOIN contractors c ON c.id = l.contractor_id
        WHERE l.id = $1
        "#,
    )
    .bind(lead_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        payment_id = %payment.id,
        estimate_id = %estimate_id,
        payment_type = payment_type.as_str(),
        amount = %payment.amount,
        "Payment completed"
    );

    state.email.send_in_background(state.email.payment_received(
        &contractor_email,
        &homeowner_name,
        payment_type,
        payment.amount,
        &payment.currency,
        estimate_id,
    ));

    Ok(())
}

async fn fail_payment(state: &AppState, session: &SessionObject) -> ApiResult<()> {
    let Some(payment_id) = session_payment_id(session) else {
        return Ok(());
    };

    let result =
        sqlx::query("UPDATE payments SET status = 'FAILED' WHERE id = $1 AND status = 'PENDING'")
            .bind(payment_id)
            .execute(&state.db)
            .await?;

    if result.rows_affected() > 0 {
        tracing::info!(payment_id = %payment_id, "Payment marked failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_completed_session_event() {
        let payment_id = Uuid::new_v4();
        let body = serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_1",
                "client_reference_id": payment_id.to_string(),
                "payment_status": "paid",
                "metadata": { "payment_type": "DEPOSIT" }
            }}
        });
        let event: StripeEvent = serde_json::from_value(body).unwrap();
        assert_eq!(event.event_type, "checkout.session.completed");
        assert_eq!(session_payment_id(&event.data.object), Some(payment_id));
    }

    #[test]
    fn missing_payment_id_is_none() {
        let session = SessionObject {
            id: "cs_test_2".to_string(),
            client_reference_id: None,
            metadata: Default::default(),
            payment_status: None,
        };
        assert_eq!(session_payment_id(&session), None);
    }
}
