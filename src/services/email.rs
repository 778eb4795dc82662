//! Transactional email through the Resend HTTP API.
//!
//! Messages are fire-and-forget: callers hand them to [`EmailClient::send_in_background`]
//! and the request never waits on or fails because of delivery.

use anyhow::{anyhow, Result};
use backoff::{future::retry, ExponentialBackoff, ExponentialBackoffBuilder};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::config::Settings;
use crate::domain::payments::PaymentType;
use crate::domain::round2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    /// Resend tag identifying the template
    pub tag: &'static str,
}

#[derive(Serialize)]
struct ResendPayload<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
    tags: [ResendTag<'a>; 1],
}

#[derive(Serialize)]
struct ResendTag<'a> {
    name: &'static str,
    value: &'a str,
}

#[derive(Deserialize)]
struct ResendResponse {
    id: String,
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn format_money(amount: Decimal, currency: &str) -> String {
    format!("{} {:.2}", currency.to_uppercase(), round2(amount))
}

#[derive(Clone)]
pub struct EmailClient {
    client: Client,
    api_base: String,
    api_key: String,
    from: String,
    app_base_url: String,
}

impl EmailClient {
    pub fn new(http: Client, settings: &Settings) -> Self {
        Self {
            client: http,
            api_base: settings.resend_api_base.trim_end_matches('/').to_string(),
            api_key: settings.resend_api_key.clone(),
            from: settings.email_from.clone(),
            app_base_url: settings.app_base_url.clone(),
        }
    }

    fn retry_policy() -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_interval(Duration::from_secs(8))
            .with_max_elapsed_time(Some(Duration::from_secs(60)))
            .build()
    }

    /// Deliver one message, retrying rate limits and server errors
    pub async fn send(&self, message: &EmailMessage) -> Result<String> {
        let url = format!("{}/emails", self.api_base);
        let payload = ResendPayload {
            from: &self.from,
            to: [&message.to],
            subject: &message.subject,
            html: &message.html,
            text: &message.text,
            tags: [ResendTag {
                name: "template",
                value: message.tag,
            }],
        };

        retry(Self::retry_policy(), || async {
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&payload)
                .timeout(Duration::from_secs(10))
                .send()
                .await
                .map_err(|e| backoff::Error::transient(anyhow!("Resend request failed: {}", e)))?;

            let status = response.status();
            if status.is_success() {
                return response
                    .json::<ResendResponse>()
                    .await
                    .map(|r| r.id)
                    .map_err(|e| backoff::Error::permanent(anyhow!("Invalid Resend response: {}", e)));
            }

            let body = response.text().await.unwrap_or_default();
            let err = anyhow!("Resend returned {}: {}", status, body);
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                tracing::debug!(status = %status, "Retrying email delivery");
                Err(backoff::Error::transient(err))
            } else {
                Err(backoff::Error::permanent(err))
            }
        })
        .await
    }

    /// Spawn delivery; failures are logged and dropped
    pub fn send_in_background(&self, message: EmailMessage) {
        let client = self.clone();
        tokio::spawn(async move {
            match client.send(&message).await {
                Ok(id) => tracing::info!(email_id = %id, template = message.tag, "Email sent"),
                Err(e) => tracing::warn!(
                    error = %e,
                    template = message.tag,
                    "Email delivery failed"
                ),
            }
        });
    }

    pub fn new_lead(
        &self,
        contractor_email: &str,
        lead_id: Uuid,
        homeowner_name: &str,
        project_type: &str,
        description: &str,
    ) -> EmailMessage {
        let link = format!("{}/dashboard/leads/{}", self.app_base_url, lead_id);
        let preview: String = description.chars().take(280).collect();
        EmailMessage {
            to: contractor_email.to_string(),
            subject: format!("New lead: {} ({})", homeowner_name, project_type),
            html: format!(
                "<p>You have a new <strong>{}</strong> lead from {}.</p>\
                 <blockquote>{}</blockquote>\
                 <p><a href=\"{}\">Review the lead</a></p>",
                escape_html(project_type),
                escape_html(homeowner_name),
                escape_html(&preview),
                link
            ),
            text: format!(
                "You have a new {} lead from {}.\n\n{}\n\nReview the lead: {}",
                project_type, homeowner_name, preview, link
            ),
            tag: "new_lead",
        }
    }

    pub fn estimate_ready(
        &self,
        homeowner_email: &str,
        homeowner_name: &str,
        contractor_name: &str,
        total: Decimal,
        currency: &str,
        public_token: &str,
    ) -> EmailMessage {
        let link = format!("{}/estimates/{}", self.app_base_url, public_token);
        let amount = format_money(total, currency);
        EmailMessage {
            to: homeowner_email.to_string(),
            subject: format!("Your estimate from {}", contractor_name),
            html: format!(
                "<p>Hi {},</p>\
                 <p>{} has prepared your estimate. Total: <strong>{}</strong>.</p>\
                 <p><a href=\"{}\">View your estimate</a></p>",
                escape_html(homeowner_name),
                escape_html(contractor_name),
                amount,
                link
            ),
            text: format!(
                "Hi {},\n\n{} has prepared your estimate. Total: {}.\n\nView it here: {}",
                homeowner_name, contractor_name, amount, link
            ),
            tag: "estimate_ready",
        }
    }

    pub fn payment_received(
        &self,
        contractor_email: &str,
        homeowner_name: &str,
        payment_type: PaymentType,
        amount: Decimal,
        currency: &str,
        estimate_id: Uuid,
    ) -> EmailMessage {
        let link = format!("{}/dashboard/estimates/{}", self.app_base_url, estimate_id);
        let amount = format_money(amount, currency);
        EmailMessage {
            to: contractor_email.to_string(),
            subject: format!("{} received from {}", payment_type.label(), homeowner_name),
            html: format!(
                "<p>{} paid a {} of <strong>{}</strong>.</p>\
                 <p><a href=\"{}\">Open the estimate</a></p>",
                escape_html(homeowner_name),
                payment_type.label().to_lowercase(),
                amount,
                link
            ),
            text: format!(
                "{} paid a {} of {}.\n\nOpen the estimate: {}",
                homeowner_name,
                payment_type.label().to_lowercase(),
                amount,
                link
            ),
            tag: "payment_received",
        }
    }
}
