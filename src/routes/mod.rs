pub mod analyze;
pub mod checkout;
pub mod documents;
pub mod estimates;
pub mod health;
pub mod leads;
pub mod me;
pub mod public;
pub mod webhooks;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::app::AppState;

/// Build the API router with all routes
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        // Public routes
        .route(
            "/health",
            get(health::health_check).head(health::health_probe),
        )
        .route("/leads", post(leads::create_lead).get(leads::list_leads))
        .route(
            "/intake/:slug/uploads",
            post(documents::presign_intake_upload),
        )
        .route(
            "/public/estimates/:token",
            get(public::get_public_estimate),
        )
        .route(
            "/public/estimates/:token/accept",
            post(public::accept_estimate),
        )
        .route("/estimates/:id/checkout", post(checkout::create_checkout))
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        // Protected routes
        .route("/me", get(me::get_me))
        // Leads
        .route(
            "/leads/:id",
            get(leads::get_lead).patch(leads::update_lead),
        )
        .route("/leads/:id/analyze", post(analyze::analyze_lead))
        .route("/leads/:id/estimate", post(estimates::generate_estimate))
        // Documents (nested under leads)
        .route(
            "/leads/:id/documents",
            get(documents::list_documents).post(documents::presign_document),
        )
        .route(
            "/leads/:id/documents/complete",
            post(documents::complete_document),
        )
        // Estimates
        .route(
            "/estimates/:id",
            get(estimates::get_estimate).patch(estimates::update_estimate),
        )
        .route("/estimates/:id/send", post(estimates::send_estimate))
        .route("/estimates/:id/payments", get(estimates::list_payments))
}
