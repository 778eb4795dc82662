use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::app::AppState;
use crate::db;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub services: ServiceHealth,
}

#[derive(Serialize)]
pub struct ServiceHealth {
    pub database: &'static str,
    pub payments: &'static str,
    pub storage: &'static str,
    pub rate_limiter: &'static str,
}

fn label(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "error"
    }
}

/// GET /api/health
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let (db_ok, payments_result, storage_result, limiter_result) = tokio::join!(
        db::health_check(&state.db),
        state.payments.health_check(),
        state.storage.health_check(),
        state.rate_limiter.health_check(),
    );

    let dependencies_ok =
        payments_result.is_ok() && storage_result.is_ok() && limiter_result.is_ok();

    // DB is critical, the rest only degrade service
    let status = match (db_ok, dependencies_ok) {
        (true, true) => "healthy",
        (true, false) => "degraded",
        (false, _) => "unhealthy",
    };

    let status_code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            services: ServiceHealth {
                database: label(db_ok),
                payments: label(payments_result.is_ok()),
                storage: label(storage_result.is_ok()),
                rate_limiter: label(limiter_result.is_ok()),
            },
        }),
    )
}

/// HEAD /api/health
///
/// Load-balancer probe; database only.
pub async fn health_probe(State(state): State<Arc<AppState>>) -> StatusCode {
    if db::health_check(&state.db).await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
