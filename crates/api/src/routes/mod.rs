//! Route definitions

pub mod cron;
pub mod plans;
pub mod subscriptions;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Cron trigger endpoints (shared-secret auth)
        .route("/api/cron/trial-expiration", post(cron::trial_expiration))
        .route("/api/cron/renewals", post(cron::renewals))
        .route("/api/cron/expiry-reminders", post(cron::expiry_reminders))
        // Plan catalog
        .route("/api/plans", get(plans::list_plans))
        .route("/api/admin/plans", post(plans::create_plan))
        .route(
            "/api/admin/plans/{id}",
            axum::routing::patch(plans::update_plan).delete(plans::delete_plan),
        )
        // Entitlements
        .route(
            "/api/users/{id}/entitlement",
            get(subscriptions::get_entitlement),
        )
        // Subscription lifecycle
        .route("/api/subscriptions/trial", post(subscriptions::start_trial))
        .route("/api/subscriptions/purchase", post(subscriptions::purchase))
        .route("/api/subscriptions/cancel", post(subscriptions::cancel))
        .route(
            "/api/subscriptions/reactivate",
            post(subscriptions::reactivate),
        )
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
