//! Stripe hosted checkout and webhook verification.

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::config::Settings;
use crate::domain::payments::PaymentType;
use crate::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "stripe";

/// Maximum age of a webhook signature
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// Parameters for one checkout session
#[derive(Debug, Clone)]
pub struct CheckoutParams<'a> {
    pub payment_id: Uuid,
    pub estimate_id: Uuid,
    pub payment_type: PaymentType,
    pub amount_minor: i64,
    pub currency: &'a str,
    pub product_name: String,
    pub customer_email: Option<&'a str>,
    pub public_token: &'a str,
    /// Unix seconds after which the session can no longer be paid
    pub expires_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorResponse {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    message: Option<String>,
}

/// Webhook event, reduced to the fields the service reads
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: SessionObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionObject {
    pub id: String,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub payment_status: Option<String>,
}

impl SessionObject {
    /// Payment id from `metadata.payment_id`, else `client_reference_id`
    pub fn payment_id(&self) -> Option<Uuid> {
        self.metadata
            .get("payment_id")
            .or(self.client_reference_id.as_ref())
            .and_then(|id| Uuid::parse_str(id).ok())
    }
}

/// Why a webhook signature was refused
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed signature header")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Stale,
    #[error("no matching signature")]
    Mismatch,
}

/// Check a `Stripe-Signature` header (`t=...,v1=...`) against the raw body.
pub fn verify_webhook_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now_secs: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            match key {
                "t" => timestamp = value.parse::<i64>().ok(),
                "v1" => signatures.push(value),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if (now_secs - timestamp).abs() > WEBHOOK_TOLERANCE_SECS {
        return Err(SignatureError::Stale);
    }

    let matches = signatures.iter().any(|sig| {
        let Ok(expected) = hex::decode(sig) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    });

    if matches {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Stripe API client
#[derive(Clone)]
pub struct PaymentsClient {
    client: Client,
    api_base: String,
    secret_key: String,
    webhook_secret: String,
    app_base_url: String,
}

impl PaymentsClient {
    pub fn new(http: Client, settings: &Settings) -> Self {
        Self {
            client: http,
            api_base: settings.stripe_api_base.trim_end_matches('/').to_string(),
            secret_key: settings.stripe_secret_key.clone(),
            webhook_secret: settings.stripe_webhook_secret.clone(),
            app_base_url: settings.app_base_url.clone(),
        }
    }

    pub fn verify_webhook(&self, payload: &[u8], header: &str) -> Result<(), SignatureError> {
        verify_webhook_signature(
            payload,
            header,
            &self.webhook_secret,
            chrono::Utc::now().timestamp(),
        )
    }

    fn form_fields(&self, params: &CheckoutParams<'_>) -> Vec<(String, String)> {
        let estimate_url = format!("{}/estimates/{}", self.app_base_url, params.public_token);
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            (
                "success_url".to_string(),
                format!("{}?checkout=success&session_id={{CHECKOUT_SESSION_ID}}", estimate_url),
            ),
            ("cancel_url".to_string(), format!("{}?checkout=cancelled", estimate_url)),
            ("client_reference_id".to_string(), params.payment_id.to_string()),
            ("expires_at".to_string(), params.expires_at.to_string()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                params.currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                params.amount_minor.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                params.product_name.clone(),
            ),
            ("metadata[estimate_id]".to_string(), params.estimate_id.to_string()),
            ("metadata[payment_id]".to_string(), params.payment_id.to_string()),
            (
                "metadata[payment_type]".to_string(),
                params.payment_type.as_str().to_string(),
            ),
        ];
        if let Some(email) = params.customer_email {
            form.push(("customer_email".to_string(), email.to_string()));
        }
        form
    }

    #[instrument(skip(self, params), fields(payment_id = %params.payment_id))]
    pub async fn create_checkout_session(
        &self,
        params: &CheckoutParams<'_>,
    ) -> Result<CheckoutSession, ApiError> {
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", params.payment_id.to_string())
            .form(&self.form_fields(params))
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Stripe request failed");
                ApiError::external(SERVICE, format!("Stripe unavailable: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<StripeErrorResponse>()
                .await
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or_else(|| format!("Stripe error: {}", status));
            error!(status = %status, message = %message, "Checkout session creation failed");
            return Err(ApiError::external(SERVICE, message));
        }

        let session: CheckoutSession = response.json().await.map_err(|e| {
            ApiError::external(SERVICE, format!("Invalid Stripe response: {}", e))
        })?;

        if session.url.is_none() {
            return Err(ApiError::external(SERVICE, "Checkout session has no URL"));
        }

        Ok(session)
    }

    pub async fn health_check(&self) -> Result<()> {
        self.client
            .get(format!("{}/v1/balance", self.api_base))
            .bearer_auth(&self.secret_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .context("Stripe health check failed")?
            .error_for_status()
            .context("Stripe unhealthy")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const NOW: i64 = 1_760_000_000;

    fn sign(payload: &[u8], timestamp: i64, secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.", timestamp).as_bytes());
        mac.update(payload);
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_valid_signature() {
        let body = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;
        let header = sign(body, NOW, SECRET);
        assert_eq!(verify_webhook_signature(body, &header, SECRET, NOW + 10), Ok(()));
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let body = b"{}";
        let valid = sign(body, NOW, SECRET);
        let v1 = valid.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1={},v1={}", NOW, "00".repeat(32), v1);
        assert_eq!(verify_webhook_signature(body, &header, SECRET, NOW), Ok(()));
    }

    #[test]
    fn rejects_tampered_body() {
        let header = sign(b"{\"amount\":100}", NOW, SECRET);
        assert_eq!(
            verify_webhook_signature(b"{\"amount\":1}", &header, SECRET, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_wrong_secret() {
        let header = sign(b"{}", NOW, "whsec_other");
        assert_eq!(
            verify_webhook_signature(b"{}", &header, SECRET, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_stale_timestamp() {
        let header = sign(b"{}", NOW - WEBHOOK_TOLERANCE_SECS - 1, SECRET);
        assert_eq!(
            verify_webhook_signature(b"{}", &header, SECRET, NOW),
            Err(SignatureError::Stale)
        );
    }

    #[test]
    fn rejects_malformed_header() {
        assert_eq!(
            verify_webhook_signature(b"{}", "garbage", SECRET, NOW),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify_webhook_signature(b"{}", &format!("t={}", NOW), SECRET, NOW),
            Err(SignatureError::Malformed)
        );
    }

    #[test]
    fn session_payment_id_prefers_metadata() {
        let id = Uuid::new_v4();
        let event: StripeEvent = serde_json::from_value(serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_1",
                "client_reference_id": "not-a-uuid",
                "metadata": { "payment_id": id.to_string() },
                "payment_status": "paid"
            }}
        }))
        .unwrap();
        assert_eq!(event.data.object.payment_id(), Some(id));
    }

    #[test]
    fn checkout_form_carries_metadata() {
        let client = PaymentsClient::new(Client::new(), &Settings::for_tests());
        let payment_id = Uuid::new_v4();
        let estimate_id = Uuid::new_v4();
        let form = client.form_fields(&CheckoutParams {
            payment_id,
            estimate_id,
            payment_type: PaymentType::Deposit,
            amount_minor: 207_057,
            currency: "USD",
            product_name: "Deposit - Roof repair".to_string(),
            customer_email: Some("dana@example.com"),
            public_token: "tok123",
            expires_at: 1_700_001_860,
        });
        let get = |k: &str| {
            form.iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("mode"), Some("payment"));
        assert_eq!(get("client_reference_id"), Some(payment_id.to_string().as_str()));
        assert_eq!(get("metadata[estimate_id]"), Some(estimate_id.to_string().as_str()));
        assert_eq!(get("metadata[payment_type]"), Some("DEPOSIT"));
        assert_eq!(get("line_items[0][price_data][unit_amount]"), Some("207057"));
        assert_eq!(get("line_items[0][price_data][currency]"), Some("usd"));
        assert_eq!(get("expires_at"), Some("1700001860"));
        assert!(get("success_url")
            .unwrap()
            .starts_with("http://localhost:3000/estimates/tok123?checkout=success"));
    }
}
