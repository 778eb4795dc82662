mod api;
mod app;
mod auth;
mod config;
mod db;
mod domain;
mod error;
mod logging;
mod middleware;
mod routes;
mod services;
mod validation;

#[cfg(test)]
mod tests;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;

use config::RateLimitBackend;
use services::rate_limiter::{RateLimiter, RedisRateLimitStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = config::Settings::from_env()?;

    logging::init_logging(&settings.env);
    error::expose_internal_details(settings.env.is_dev());

    tracing::info!(
        env = ?settings.env,
        server_addr = %settings.server_addr,
        "Starting QuoteCraft backend"
    );

    let pool = db::create_pool(&settings).await?;
    if settings.database_run_migrations {
        db::run_migrations(&pool).await?;
    }

    let rate_limiter = match settings.rate_limit_backend {
        RateLimitBackend::Redis => {
            RateLimiter::new(Arc::new(RedisRateLimitStore::new(&settings.redis_url).await?))
        }
        RateLimitBackend::Memory => {
            tracing::warn!("Using in-memory rate limiting; counters are per process");
            RateLimiter::in_memory()
        }
    };

    let state = app::AppState::new(pool, settings.clone(), rate_limiter)?;

    // Non-blocking AI service probe
    tokio::spawn({
        let ai_client = state.ai_client.clone();
        async move {
            match ai_client.health_check().await {
                Ok(()) => tracing::info!("AI service is healthy"),
                Err(e) => tracing::warn!(error = %e, "AI service health check failed - will retry on first request"),
            }
        }
    });

    if let Err(e) = state.jwks_cache.warm_cache().await {
        tracing::warn!(error = %e, "Failed to warm JWKS cache - will fetch on first request");
    }

    let app = app::create_app(state);

    let listener = tokio::net::TcpListener::bind(&settings.server_addr).await?;
    tracing::info!("Listening on {}", settings.server_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
