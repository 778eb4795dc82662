//! Client for the internal AI service.
//!
//! Provides type-safe methods for:
//! - Per-photo vision analysis
//! - Scope-of-work generation
//! - Estimate line-item generation

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument};

use crate::domain::ai::{GeneratedEstimate, PhotoAnalysis, ScopeOfWork};
use crate::domain::takeoffs::AggregateAnalysis;
use crate::error::ApiError;

const SERVICE: &str = "ai";

/// Client for the AI service.
#[derive(Clone)]
pub struct AiClient {
    client: Client,
    base_url: String,
    token: String,
}

/// Error response from AI service.
#[derive(Debug, Deserialize)]
struct AiErrorResponse {
    message: String,
}

impl AiClient {
    pub fn new(base_url: &str, token: &str, timeout_seconds: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        tracing::info!(base_url = base_url, "AI client initialized");

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn post<T: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
        request_id: Option<&str>,
    ) -> Result<R, ApiError> {
        let url = format!("{}{}", self.base_url, path);

        let mut req = self
            .client
            .post(&url)
            .header("X-Internal-Token", &self.token);

        if let Some(rid) = request_id {
            req = req.header("x-request-id", rid);
        }

        debug!(url = %url, "AI service request");

        let response = req.json(body).send().await.map_err(|e| {
            error!(error = %e, "AI service request failed");
            ApiError::external(SERVICE, format!("AI service unavailable: {}", e))
        })?;

        let status = response.status();

        if status.is_success() {
            return response.json::<R>().await.map_err(|e| {
                error!(error = %e, "Failed to parse AI service response");
                ApiError::external(SERVICE, format!("Invalid AI service response: {}", e))
            });
        }

        let message = response
            .json::<AiErrorResponse>()
            .await
            .map(|e| e.message)
            .unwrap_or_else(|_| format!("AI service error: {}", status));

        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(ApiError::validation(message))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                error!("AI service authentication failed");
                Err(ApiError::external(SERVICE, "AI service auth error"))
            }
            _ => {
                error!(status = %status, message = %message, "AI service error");
                Err(ApiError::external(SERVICE, message))
            }
        }
    }

    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);

        self.client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .context("AI service health check failed")?
            .error_for_status()
            .context("AI service unhealthy")?;

        Ok(())
    }

    /// Analyze one photo, reachable by the service at `image_url`.
    #[instrument(skip(self, image_url, description))]
    pub async fn analyze_photo(
        &self,
        image_url: &str,
        project_type: &str,
        description: &str,
        request_id: Option<&str>,
    ) -> Result<PhotoAnalysis, ApiError> {
        #[derive(Serialize)]
        struct Request<'a> {
            image_url: &'a str,
            project_type: &'a str,
            description: &'a str,
        }

        #[derive(Deserialize)]
        struct Response {
            analysis: PhotoAnalysis,
        }

        let response: Response = self
            .post(
                "/v1/photos/analyze",
                &Request {
                    image_url,
                    project_type,
                    description,
                },
                request_id,
            )
            .await?;

        Ok(response.analysis)
    }

    /// Generate a scope of work from the aggregated photo analysis.
    #[instrument(skip(self, description, analysis))]
    pub async fn generate_scope(
        &self,
        project_type: &str,
        description: &str,
        analysis: &AggregateAnalysis,
        request_id: Option<&str>,
    ) -> Result<ScopeOfWork, ApiError> {
        #[derive(Serialize)]
        struct Request<'a> {
            project_type: &'a str,
            description: &'a str,
            analysis: &'a AggregateAnalysis,
        }

        #[derive(Deserialize)]
        struct Response {
            scope: ScopeOfWork,
        }

        let response: Response = self
            .post(
                "/v1/scope",
                &Request {
                    project_type,
                    description,
                    analysis,
                },
                request_id,
            )
            .await?;

        Ok(response.scope)
    }

    /// Propose priced line items for a scope of work.
    #[instrument(skip(self, scope))]
    pub async fn generate_estimate(
        &self,
        project_type: &str,
        scope: &ScopeOfWork,
        currency: &str,
        request_id: Option<&str>,
    ) -> Result<GeneratedEstimate, ApiError> {
        #[derive(Serialize)]
        struct Request<'a> {
            project_type: &'a str,
            scope: &'a ScopeOfWork,
            currency: &'a str,
        }

        self.post(
            "/v1/estimates/generate",
            &Request {
                project_type,
                scope,
                currency,
            },
            request_id,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash() {
        let client = AiClient::new("http://ai-service:8000/", "t", 5).unwrap();
        assert_eq!(client.base_url, "http://ai-service:8000");
    }

    #[tokio::test]
    async fn unreachable_service_is_bad_gateway() {
        let client = AiClient::new("http://127.0.0.1:1", "t", 1).unwrap();
        let err = client
            .analyze_photo("http://img", "roof_repair", "leak", Some("req-1"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_GATEWAY);
        assert_eq!(err.error_code(), "EXTERNAL_SERVICE_ERROR");
    }
}
