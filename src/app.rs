use anyhow::{Context, Result};
use axum::{http::HeaderValue, Router};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, CorsLayer, ExposeHeaders},
    limit::RequestBodyLimitLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::auth::JwksCache;
use crate::config::Settings;
use crate::middleware::request_id_layer;
use crate::routes;
use crate::services::rate_limiter::{X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};
use crate::services::{AiClient, EmailClient, PaymentsClient, RateLimiter, Storage};

/// JSON bodies are small; uploads go straight to object storage
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub settings: Settings,
    pub jwks_cache: JwksCache,
    pub rate_limiter: RateLimiter,
    pub ai_client: AiClient,
    pub storage: Storage,
    pub payments: PaymentsClient,
    pub email: EmailClient,
}

impl AppState {
    /// Build every collaborator client from settings. Supabase, Stripe and
    /// Resend share one HTTP client.
    pub fn new(db: PgPool, settings: Settings, rate_limiter: RateLimiter) -> Result<Arc<Self>> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let jwks_cache = JwksCache::new(
            http_client.clone(),
            settings.supabase_jwt_jwks_url.clone(),
            settings.supabase_jwt_issuer.clone(),
            settings.supabase_jwt_audience.clone(),
            settings.jwks_cache_ttl_seconds,
        )
        .with_shared_secret(settings.supabase_jwt_secret.as_deref());

        let ai_client = AiClient::new(
            &settings.ai_service_url,
            &settings.ai_service_token,
            settings.ai_service_timeout_seconds,
        )?;

        let storage = Storage::new(&settings);
        let payments = PaymentsClient::new(http_client.clone(), &settings);
        let email = EmailClient::new(http_client, &settings);

        Ok(Arc::new(Self {
            db,
            settings,
            jwks_cache,
            rate_limiter,
            ai_client,
            storage,
            payments,
            email,
        }))
    }
}

/// Build the complete application with all middleware
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state.settings);

    // DEBUG spans keep INFO output quiet
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    let (set_request_id, propagate_request_id) = request_id_layer();

    Router::new()
        .nest("/api", routes::api_router())
        // Middleware stack (applied bottom-up)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(propagate_request_id)
        .layer(trace_layer)
        .layer(set_request_id)
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors_allow_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let max_age = if settings.env.is_dev() {
        Duration::from_secs(86400)
    } else {
        Duration::from_secs(3600)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(AllowMethods::list([
            axum::http::Method::GET,
            axum::http::Method::HEAD,
            axum::http::Method::POST,
            axum::http::Method::PATCH,
            axum::http::Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::HeaderName::from_static("x-request-id"),
        ]))
        .expose_headers(ExposeHeaders::list([
            axum::http::HeaderName::from_static(X_RATELIMIT_LIMIT),
            axum::http::HeaderName::from_static(X_RATELIMIT_REMAINING),
            axum::http::HeaderName::from_static(X_RATELIMIT_RESET),
            axum::http::header::RETRY_AFTER,
            axum::http::HeaderName::from_static("x-request-id"),
        ]))
        .allow_credentials(true)
        .max_age(max_age)
}
