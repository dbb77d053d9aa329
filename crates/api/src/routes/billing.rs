//! Package catalog, checkout and subscription routes

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use keyhaven_billing::{CheckoutResponse, CurrentSubscription, Package, Payment, VerifyOutcome};
use keyhaven_shared::Identity;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub package_id: Uuid,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub subscription: Option<CurrentSubscription>,
}

/// GET /api/v1/packages
pub async fn list_packages(State(state): State<AppState>) -> ApiResult<Json<Vec<Package>>> {
    Ok(Json(state.billing.ledger.list_packages().await?))
}

/// GET /api/v1/packages/{slug}
pub async fn get_package(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Json<Package>> {
    Ok(Json(state.billing.ledger.get_package(&slug).await?))
}

/// POST /api/v1/billing/checkout
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CheckoutRequest>,
) -> ApiResult<Json<CheckoutResponse>> {
    let response = state
        .billing
        .ledger
        .initiate_checkout(&identity, req.package_id, &req.success_url, &req.cancel_url)
        .await?;

    Ok(Json(response))
}

/// POST /api/v1/billing/payments/{id}/verify
pub async fn verify_payment(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<Json<VerifyOutcome>> {
    let outcome = state
        .billing
        .ledger
        .verify_payment(&identity, payment_id)
        .await?;

    Ok(Json(outcome))
}

/// GET /api/v1/billing/subscription
pub async fn current_subscription(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let subscription = state.billing.ledger.current_subscription(&identity).await?;
    Ok(Json(SubscriptionResponse { subscription }))
}

/// POST /api/v1/billing/payments/{id}/refund (admin)
pub async fn refund_payment(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<Json<Payment>> {
    let payment = state
        .billing
        .ledger
        .record_refund(&identity, payment_id)
        .await?;

    Ok(Json(payment))
}
