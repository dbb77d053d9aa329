//! Payment gateway adapter
//!
//! The ledger talks to the external processor only through [`PaymentGateway`].
//! [`HttpGateway`] is the production implementation: an HTTPS JSON API
//! authenticated with a server-held bearer secret. No retries happen here;
//! an idempotent `verify_payment` is the recovery path.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Metadata attached to a checkout and echoed back by the processor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: CheckoutMetadata,
}

/// A checkout opened at the processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub external_id: String,
    pub redirect_url: String,
}

/// Remote state of a checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteCheckoutState {
    Open,
    Completed,
    Failed,
    Expired,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutStatus {
    pub status: RemoteCheckoutState,
    pub metadata: CheckoutMetadata,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout(&self, request: &CheckoutRequest) -> BillingResult<CheckoutSession>;

    async fn checkout_status(&self, external_id: &str) -> BillingResult<CheckoutStatus>;
}

/// Gateway credentials and endpoint, injected at construction
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub secret_key: String,
    pub webhook_secret: String,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct CreateCheckoutBody<'a> {
    amount: i64,
    currency: &'a str,
    success_url: &'a str,
    cancel_url: &'a str,
    metadata: &'a CheckoutMetadata,
}

#[derive(Debug, Deserialize)]
struct CheckoutCreatedBody {
    id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct CheckoutStatusBody {
    status: RemoteCheckoutState,
    #[serde(default)]
    metadata: CheckoutMetadata,
}

/// reqwest-backed [`PaymentGateway`]
#[derive(Debug, Clone)]
pub struct HttpGateway {
    config: GatewayConfig,
    client: Client,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> BillingResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BillingError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn read_success(response: reqwest::Response) -> BillingResult<String> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::error!(
                status = %status,
                body_len = body.len(),
                body = %truncate_for_log(&body),
                "Payment gateway returned non-success status"
            );
            return Err(BillingError::Gateway(format!(
                "gateway responded with status {}",
                status.as_u16()
            )));
        }

        Ok(body)
    }
}

/// Characters of a gateway error body kept in logs
const LOGGED_BODY_CHARS: usize = 256;

fn truncate_for_log(body: &str) -> &str {
    match body.char_indices().nth(LOGGED_BODY_CHARS) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

fn is_valid_external_id(external_id: &str) -> bool {
    !external_id.is_empty()
        && external_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn create_checkout(&self, request: &CheckoutRequest) -> BillingResult<CheckoutSession> {
        let body = CreateCheckoutBody {
            amount: request.amount_cents,
            currency: &request.currency,
            success_url: &request.success_url,
            cancel_url: &request.cancel_url,
            metadata: &request.metadata,
        };

        let response = self
            .client
            .post(self.endpoint("/v1/checkouts"))
            .bearer_auth(&self.config.secret_key)
            .json(&body)
            .send()
            .await?;

        let text = Self::read_success(response).await?;
        let created: CheckoutCreatedBody = serde_json::from_str(&text)
            .map_err(|e| BillingError::Gateway(format!("invalid checkout response: {e}")))?;

        tracing::debug!(checkout_id = %created.id, "Gateway checkout created");

        Ok(CheckoutSession {
            external_id: created.id,
            redirect_url: created.url,
        })
    }

    async fn checkout_status(&self, external_id: &str) -> BillingResult<CheckoutStatus> {
        if !is_valid_external_id(external_id) {
            return Err(BillingError::Gateway(format!(
                "malformed checkout id: {external_id}"
            )));
        }

        let response = self
            .client
            .get(self.endpoint(&format!("/v1/checkouts/{external_id}")))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await?;

        let text = Self::read_success(response).await?;
        let body: CheckoutStatusBody = serde_json::from_str(&text)
            .map_err(|e| BillingError::Gateway(format!("invalid checkout status response: {e}")))?;

        Ok(CheckoutStatus {
            status: body.status,
            metadata: body.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn gateway_for(server: &mockito::ServerGuard) -> HttpGateway {
        HttpGateway::new(GatewayConfig {
            base_url: format!("{}/", server.url()),
            secret_key: "sk_test_123".to_string(),
            webhook_secret: "whsec_test".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn sample_request() -> CheckoutRequest {
        CheckoutRequest {
            amount_cents: 49_900,
            currency: "usd".to_string(),
            success_url: "https://app.example.com/billing/success".to_string(),
            cancel_url: "https://app.example.com/billing/cancel".to_string(),
            metadata: CheckoutMetadata {
                payment_id: Some(Uuid::nil()),
                user_id: Some(Uuid::nil()),
                package_id: Some(Uuid::nil()),
            },
        }
    }

    #[tokio::test]
    async fn test_create_checkout_sends_bearer_and_amount() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/checkouts")
            .match_header("authorization", "Bearer sk_test_123")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "amount": 49900,
                "currency": "usd",
                "metadata": { "packageId": Uuid::nil() }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"chk_001","url":"https://pay.example.com/c/chk_001"}"#)
            .create_async()
            .await;

        let session = gateway_for(&server)
            .create_checkout(&sample_request())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(session.external_id, "chk_001");
        assert_eq!(session.redirect_url, "https://pay.example.com/c/chk_001");
    }

    #[tokio::test]
    async fn test_create_checkout_non_success_is_gateway_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/checkouts")
            .with_status(503)
            .with_body("upstream unavailable")
            .create_async()
            .await;

        let err = gateway_for(&server)
            .create_checkout(&sample_request())
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Gateway(_)), "got {err:?}");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_checkout_status_decodes_state_and_metadata() {
        let user_id = Uuid::new_v4();
        let package_id = Uuid::new_v4();
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/checkouts/chk_42")
            .match_header("authorization", "Bearer sk_test_123")
            .with_status(200)
            .with_body(format!(
                r#"{{"id":"chk_42","status":"completed","metadata":{{"userId":"{user_id}","packageId":"{package_id}"}}}}"#
            ))
            .create_async()
            .await;

        let status = gateway_for(&server).checkout_status("chk_42").await.unwrap();

        assert_eq!(status.status, RemoteCheckoutState::Completed);
        assert_eq!(status.metadata.user_id, Some(user_id));
        assert_eq!(status.metadata.package_id, Some(package_id));
        assert_eq!(status.metadata.payment_id, None);
    }

    #[tokio::test]
    async fn test_checkout_status_unknown_state_is_tolerated() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/checkouts/chk_7")
            .with_status(200)
            .with_body(r#"{"id":"chk_7","status":"processing"}"#)
            .create_async()
            .await;

        let status = gateway_for(&server).checkout_status("chk_7").await.unwrap();
        assert_eq!(status.status, RemoteCheckoutState::Unknown);
        assert_eq!(status.metadata, CheckoutMetadata::default());
    }

    #[tokio::test]
    async fn test_checkout_status_rejects_path_characters() {
        let server = mockito::Server::new_async().await;
        let err = gateway_for(&server)
            .checkout_status("../admin")
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Gateway(_)));
    }

    #[tokio::test]
    async fn test_checkout_status_garbage_body_is_gateway_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/checkouts/chk_9")
            .with_status(200)
            .with_body("<html>oops</html>")
            .create_async()
            .await;

        let err = gateway_for(&server).checkout_status("chk_9").await.unwrap_err();
        assert!(matches!(err, BillingError::Gateway(_)));
    }

    #[test]
    fn test_logged_error_body_is_truncated_on_char_boundary() {
        let short = "upstream timeout";
        assert_eq!(truncate_for_log(short), short);

        let long = "é".repeat(LOGGED_BODY_CHARS * 4);
        let logged = truncate_for_log(&long);
        assert_eq!(logged.chars().count(), LOGGED_BODY_CHARS);
        assert!(long.starts_with(logged));
    }

    #[tokio::test]
    async fn test_large_error_body_still_maps_to_gateway_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/checkouts")
            .with_status(500)
            .with_body("x".repeat(64 * 1024))
            .create_async()
            .await;

        let request = CheckoutRequest {
            amount_cents: 100,
            currency: "usd".to_string(),
            success_url: "https://s".to_string(),
            cancel_url: "https://c".to_string(),
            metadata: CheckoutMetadata::default(),
        };
        let err = gateway_for(&server).create_checkout(&request).await.unwrap_err();
        assert!(matches!(err, BillingError::Gateway(ref msg) if msg.contains("500")));
    }
}
