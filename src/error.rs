//! Unified API error handling
//!
//! Every failure leaves the service as
//! `{ "error": { "message", "code", "statusCode", "details"? } }`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::services::rate_limiter::RateLimitDecision;
use crate::validation::ValidationErrors;

/// Whether 500 responses carry the debug rendering of their cause.
/// Switched on at startup in development only.
static EXPOSE_INTERNAL_DETAILS: AtomicBool = AtomicBool::new(false);

pub fn expose_internal_details(enabled: bool) {
    EXPOSE_INTERNAL_DETAILS.store(enabled, Ordering::Relaxed);
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        details: Option<ValidationErrors>,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded")]
    RateLimited(RateLimitDecision),

    #[error("{service} request failed: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
    },

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("Database error")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub message: String,
    pub code: String,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: None,
        }
    }

    /// Single-field validation failure
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::default();
        errors.add(field, message);
        errors.into()
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn external(service: &'static str, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(anyhow::anyhow!(message.into()))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::ExternalService { .. } => StatusCode::BAD_GATEWAY,
            Self::Internal(_) | Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::RateLimited(_) => "RATE_LIMITED",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Internal(_) | Self::Database(_) => "INTERNAL_ERROR",
        }
    }

    /// Client-caused failures that are part of normal operation
    pub fn is_operational(&self) -> bool {
        !matches!(
            self,
            Self::Internal(_) | Self::Database(_) | Self::ExternalService { .. }
        )
    }

    fn public_message(&self) -> String {
        match self {
            Self::Validation { message, .. } => message.clone(),
            Self::Unauthorized(msg)
            | Self::Forbidden(msg)
            | Self::NotFound(msg)
            | Self::Conflict(msg) => msg.clone(),
            Self::RateLimited(_) => "Too many requests, please try again later".to_string(),
            Self::ExternalService { service, .. } => {
                format!("Upstream service '{}' is unavailable", service)
            }
            // Don't leak internal error details
            Self::Internal(_) | Self::Database(_) => "An internal error occurred".to_string(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation { details, .. } => details
                .as_ref()
                .and_then(|d| serde_json::to_value(d).ok()),
            Self::RateLimited(decision) => Some(serde_json::json!({
                "limit": decision.limit,
                "remaining": decision.remaining,
                "reset": decision.reset_ms,
            })),
            Self::Internal(e) if EXPOSE_INTERNAL_DETAILS.load(Ordering::Relaxed) => {
                Some(serde_json::Value::String(format!("{:?}", e)))
            }
            Self::Database(e) if EXPOSE_INTERNAL_DETAILS.load(Ordering::Relaxed) => {
                Some(serde_json::Value::String(format!("{:?}", e)))
            }
            Self::ExternalService { message, .. }
                if EXPOSE_INTERNAL_DETAILS.load(Ordering::Relaxed) =>
            {
                Some(serde_json::Value::String(message.clone()))
            }
            _ => None,
        }
    }

    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorBody {
                message: self.public_message(),
                code: self.error_code().to_string(),
                status_code: self.status_code().as_u16(),
                details: self.details(),
            },
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation {
            message: "Request validation failed".to_string(),
            details: Some(errors),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.is_operational() {
            tracing::warn!(error = %self, code = self.error_code(), "API error");
        } else {
            match &self {
                Self::Internal(e) => tracing::error!(error = ?e, "Internal server error"),
                Self::Database(e) => tracing::error!(error = ?e, "Database error"),
                other => tracing::error!(error = %other, "External service error"),
            }
        }

        let status = self.status_code();
        let body = Json(self.to_envelope());

        match self {
            Self::RateLimited(decision) => (status, decision, body).into_response(),
            _ => (status, body).into_response(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Whether a query failed on a UNIQUE constraint
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// A unique-constraint failure as the driver reports it
#[cfg(test)]
pub(crate) fn unique_violation() -> sqlx::Error {
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::error::Error as StdError;

    #[derive(Debug)]
    struct Duplicate;

    impl std::fmt::Display for Duplicate {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("duplicate key value violates unique constraint")
        }
    }

    impl StdError for Duplicate {}

    impl DatabaseError for Duplicate {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint"
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    sqlx::Error::Database(Box::new(Duplicate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_map_to_422_with_field_details() {
        let mut errors = ValidationErrors::default();
        errors.add("email", "must be a valid email address");
        let err: ApiError = errors.into();

        let envelope = err.to_envelope();
        assert_eq!(envelope.error.status_code, 422);
        assert_eq!(envelope.error.code, "VALIDATION_ERROR");
        let details = envelope.error.details.expect("details");
        assert_eq!(details["email"][0], "must be a valid email address");
    }

    #[test]
    fn detects_unique_violations() {
        assert!(is_unique_violation(&unique_violation()));
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(ApiError::unauthorized("x").status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::forbidden("x").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::conflict("x").status_code(), StatusCode::CONFLICT);
        assert_eq!(ApiError::external("ai", "x").status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ApiError::internal("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_details_hidden_by_default() {
        let envelope = ApiError::internal("secret connection string").to_envelope();
        assert_eq!(envelope.error.message, "An internal error occurred");
        assert!(envelope.error.details.is_none());
    }

    #[test]
    fn envelope_uses_camel_case_status_code() {
        let json = serde_json::to_value(ApiError::not_found("Lead not found").to_envelope())
            .expect("serialize");
        assert_eq!(json["error"]["statusCode"], 404);
        assert_eq!(json["error"]["code"], "NOT_FOUND");
        assert_eq!(json["error"]["message"], "Lead not found");
        assert!(json["error"].get("details").is_none());
    }

    #[test]
    fn operational_split() {
        assert!(ApiError::validation("x").is_operational());
        assert!(ApiError::forbidden("x").is_operational());
        assert!(!ApiError::internal("x").is_operational());
        assert!(!ApiError::external("stripe", "x").is_operational());
    }
}
