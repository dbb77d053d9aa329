//! HTTP routes

pub mod auth;
pub mod billing;
pub mod listings;
pub mod webhooks;

use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::{auth::require_auth, state::AppState};

/// Build the application router. CORS and tracing layers are added by the binary.
pub fn create_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/packages", get(billing::list_packages))
        .route("/packages/{slug}", get(billing::get_package))
        .route("/webhooks/gateway", post(webhooks::gateway_webhook));

    let protected = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/logout-all", post(auth::logout_all))
        .route("/auth/me", get(auth::me))
        .route("/listings/authorize", post(listings::authorize_write))
        .route("/billing/checkout", post(billing::create_checkout))
        .route("/billing/payments/{id}/verify", post(billing::verify_payment))
        .route("/billing/payments/{id}/refund", post(billing::refund_payment))
        .route("/billing/subscription", get(billing::current_subscription))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", public.merge(protected))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
