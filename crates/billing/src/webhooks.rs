//! Gateway webhook handling
//!
//! Callbacks are signed with `t=<unix>,v1=<hex hmac-sha256("t.payload")>`.
//! A verified callback only names a checkout; settlement re-reads the
//! authoritative status from the gateway, so duplicate or reordered
//! deliveries are harmless.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use keyhaven_shared::Clock;
use serde::Deserialize;
use sha2::Sha256;

use crate::error::{BillingError, BillingResult};
use crate::subscriptions::{SubscriptionLedger, VerifyOutcome};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age (either direction) of a signed callback, in seconds
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayEventData {
    pub checkout_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: GatewayEventData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed(VerifyOutcome),
    Ignored,
}

#[derive(Clone)]
pub struct WebhookHandler {
    secret: String,
    ledger: SubscriptionLedger,
    clock: Arc<dyn Clock>,
}

impl WebhookHandler {
    pub fn new(secret: impl Into<String>, ledger: SubscriptionLedger, clock: Arc<dyn Clock>) -> Self {
        Self {
            secret: secret.into(),
            ledger,
            clock,
        }
    }

    /// Verify the signature header and parse the event
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<GatewayEvent> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<&str> = None;

        for part in signature.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => v1_signature = Some(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::warn!("Missing timestamp in webhook signature header");
            BillingError::WebhookSignatureInvalid
        })?;
        let v1_signature = v1_signature.ok_or_else(|| {
            tracing::warn!("Missing v1 signature in webhook signature header");
            BillingError::WebhookSignatureInvalid
        })?;

        let now = self.clock.now().unix_timestamp();
        if now.abs_diff(timestamp) > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
            tracing::warn!(timestamp, now, "Webhook timestamp outside tolerance");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let expected = hex::decode(v1_signature).map_err(|_| BillingError::WebhookSignatureInvalid)?;

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| BillingError::Internal("invalid webhook secret".to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());

        // Constant-time comparison
        mac.verify_slice(&expected).map_err(|_| {
            tracing::warn!("Webhook signature mismatch");
            BillingError::WebhookSignatureInvalid
        })?;

        serde_json::from_str(payload).map_err(|e| {
            tracing::warn!(error = %e, "Failed to parse webhook event JSON");
            BillingError::Invalid(format!("malformed webhook event: {e}"))
        })
    }

    /// Route a verified event to the ledger
    pub async fn handle_event(&self, event: GatewayEvent) -> BillingResult<WebhookOutcome> {
        match event.event_type.as_str() {
            "checkout.completed" | "checkout.failed" => {}
            other => {
                tracing::debug!(event_id = %event.id, event_type = %other, "Ignoring webhook event");
                return Ok(WebhookOutcome::Ignored);
            }
        }

        match self.ledger.settle_checkout(&event.data.checkout_id).await {
            Ok(outcome) => {
                tracing::info!(
                    event_id = %event.id,
                    checkout_id = %event.data.checkout_id,
                    success = outcome.success,
                    "Webhook processed"
                );
                Ok(WebhookOutcome::Processed(outcome))
            }
            Err(BillingError::NotFound(_)) => {
                // Not one of ours; acknowledge so the gateway stops redelivering.
                tracing::warn!(
                    event_id = %event.id,
                    checkout_id = %event.data.checkout_id,
                    "Webhook for unknown checkout"
                );
                Ok(WebhookOutcome::Ignored)
            }
            Err(BillingError::Invalid(reason)) => {
                // Redelivery cannot fix a mismatched checkout; leave the payment pending.
                tracing::warn!(
                    event_id = %event.id,
                    checkout_id = %event.data.checkout_id,
                    reason = %reason,
                    "Webhook rejected by ledger"
                );
                Ok(WebhookOutcome::Ignored)
            }
            Err(e) => Err(e),
        }
    }
}

/// Build a signature header for `payload` at `timestamp`
pub fn sign_payload(secret: &str, timestamp: i64, payload: &str) -> BillingResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::Internal("invalid webhook secret".to_string()))?;
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    Ok(format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    ))
}
