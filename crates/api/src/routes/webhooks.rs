//! Gateway callbacks

use axum::{extract::State, http::HeaderMap, Json};
use keyhaven_billing::WebhookOutcome;
use serde_json::{json, Value};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

pub const SIGNATURE_HEADER: &str = "Gateway-Signature";

/// POST /api/v1/webhooks/gateway
///
/// The body must be read raw: the signature covers the exact bytes sent.
pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing signature header".to_string()))?;

    let event = state.billing.webhooks.verify_event(&body, signature)?;
    let event_id = event.id.clone();

    let processed = match state.billing.webhooks.handle_event(event).await? {
        WebhookOutcome::Processed(outcome) => outcome.success,
        WebhookOutcome::Ignored => false,
    };

    tracing::debug!(event_id = %event_id, processed, "Webhook acknowledged");

    Ok(Json(json!({ "received": true })))
}
