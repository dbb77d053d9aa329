#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! End-to-end tests over the HTTP router with in-memory stores and a
//! recording gateway.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use keyhaven_api::{
    auth::{
        hash_password, ListingGuard, MemoryCredentialStore, MemoryOwnershipDirectory,
        SessionResolver, UserRecord,
    },
    routes::create_router,
    AppState, Config,
};
use keyhaven_billing::{
    testing::{gold_package, RecordingGateway, GOLD_PACKAGE_ID},
    webhooks::sign_payload,
    BillingService, GatewayConfig, MemoryLedgerStore, RemoteCheckoutState,
};
use keyhaven_shared::{Clock, FixedClock, Role};
use serde_json::{json, Value};
use time::{macros::datetime, Duration};
use tower::ServiceExt;
use uuid::Uuid;

const WEBHOOK_SECRET: &str = "whsec_integration";
const PASSWORD: &str = "correct-horse-battery";

struct TestApp {
    router: Router,
    gateway: Arc<RecordingGateway>,
    ledger_store: MemoryLedgerStore,
    clock: Arc<FixedClock>,
    agent_id: Uuid,
    listing_id: Uuid,
}

fn config() -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        bind_address: "127.0.0.1:0".to_string(),
        session_ttl: Duration::hours(24),
        gateway: GatewayConfig {
            base_url: "https://pay.example.test".to_string(),
            secret_key: "sk_test".to_string(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            timeout: std::time::Duration::from_secs(5),
        },
        allowed_origins: Vec::new(),
    }
}

fn user(email: &str, role: Role, password_hash: &str) -> UserRecord {
    UserRecord {
        id: Uuid::new_v4(),
        email: email.to_string(),
        password_hash: password_hash.to_string(),
        role,
        agent_id: None,
        agency_id: None,
        contractor_id: None,
        is_active: true,
        is_verified: true,
    }
}

async fn spawn_app() -> TestApp {
    let clock = Arc::new(FixedClock::new(datetime!(2026-04-01 10:00 UTC)));
    let password_hash = hash_password(PASSWORD).unwrap();

    let agency_id = Uuid::new_v4();
    let agent_id = Uuid::new_v4();
    let listing_id = Uuid::new_v4();

    let credentials = MemoryCredentialStore::new();
    credentials
        .insert_user(user("admin@keyhaven.test", Role::Admin, &password_hash))
        .await;
    credentials
        .insert_user(user("buyer@keyhaven.test", Role::Browser, &password_hash))
        .await;
    credentials
        .insert_user(user("other@keyhaven.test", Role::Browser, &password_hash))
        .await;
    let mut agent = user("agent@keyhaven.test", Role::Agent, &password_hash);
    agent.agent_id = Some(agent_id);
    credentials.insert_user(agent).await;
    let mut agency = user("agency@keyhaven.test", Role::Agency, &password_hash);
    agency.agency_id = Some(Uuid::new_v4());
    credentials.insert_user(agency).await;

    let directory = MemoryOwnershipDirectory::new();
    directory.insert_agent(agent_id, Some(agency_id)).await;
    directory.insert_listing(listing_id, agent_id).await;

    let ledger_store = MemoryLedgerStore::new();
    ledger_store.insert_package(gold_package()).await;
    let gateway = Arc::new(RecordingGateway::new());

    let config = config();
    let sessions = SessionResolver::new(Arc::new(credentials), clock.clone(), config.session_ttl);
    let billing = BillingService::from_parts(
        Arc::new(ledger_store.clone()),
        gateway.clone(),
        clock.clone(),
        WEBHOOK_SECRET,
    );
    let state = AppState::from_parts(
        config,
        sessions,
        ListingGuard::new(Arc::new(directory)),
        billing,
    );

    TestApp {
        router: create_router(state),
        gateway,
        ledger_store,
        clock,
        agent_id,
        listing_id,
    }
}

impl TestApp {
    async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        self.send(builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn login(&self, email: &str) -> String {
        let (status, body) = self
            .request(
                Method::POST,
                "/api/v1/auth/login",
                None,
                Some(json!({ "email": email, "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["token"].as_str().unwrap().to_string()
    }

    async fn checkout(&self, token: &str) -> String {
        let (status, body) = self
            .request(
                Method::POST,
                "/api/v1/billing/checkout",
                Some(token),
                Some(json!({
                    "package_id": GOLD_PACKAGE_ID,
                    "success_url": "https://app.keyhaven.test/billing/success",
                    "cancel_url": "https://app.keyhaven.test/billing/cancel"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["payment_id"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn health_is_public() {
    let app = spawn_app().await;
    let (status, body) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn login_me_logout() {
    let app = spawn_app().await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": "buyer@keyhaven.test", "password": "nope" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid email or password");

    let token = app.login("buyer@keyhaven.test").await;

    let (status, body) = app.request(Method::GET, "/api/v1/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "BROWSER");

    let (status, _) = app
        .request(Method::POST, "/api/v1/auth/logout", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.request(Method::GET, "/api/v1/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_expiry_is_enforced() {
    let app = spawn_app().await;
    let token = app.login("buyer@keyhaven.test").await;

    app.clock.advance(Duration::hours(24));
    let (status, body) = app.request(Method::GET, "/api/v1/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 401);
}

#[tokio::test]
async fn listing_authorization_over_http() {
    let app = spawn_app().await;
    let agent = app.login("agent@keyhaven.test").await;
    let agency = app.login("agency@keyhaven.test").await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/listings/authorize",
            Some(&agent),
            Some(json!({ "action": "update", "listing_id": app.listing_id })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["allowed"], true);
    assert_eq!(body["action"], "update");

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/listings/authorize",
            Some(&agency),
            Some(json!({ "action": "delete", "listing_id": app.listing_id })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "not your agency's listing");

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/listings/authorize",
            Some(&agent),
            Some(json!({ "action": "delete", "listing_id": Uuid::new_v4() })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/listings/authorize",
            None,
            Some(json!({ "action": "create", "agent_id": app.agent_id })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn catalog_is_public() {
    let app = spawn_app().await;

    let (status, body) = app.request(Method::GET, "/api/v1/packages", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["slug"], "gold");

    let (status, body) = app.request(Method::GET, "/api/v1/packages/gold", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["price_cents"], 49_900);

    let (status, _) = app
        .request(Method::GET, "/api/v1/packages/platinum", None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn checkout_verify_and_subscription() {
    let app = spawn_app().await;
    let token = app.login("buyer@keyhaven.test").await;

    let payment_id = app.checkout(&token).await;
    assert_eq!(app.gateway.create_calls(), 1);

    let verify_uri = format!("/api/v1/billing/payments/{payment_id}/verify");

    // Still open at the gateway
    let (status, body) = app.request(Method::POST, &verify_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);

    let (_, body) = app
        .request(Method::GET, "/api/v1/billing/subscription", Some(&token), None)
        .await;
    assert!(body["subscription"].is_null());

    app.gateway.set_state(RemoteCheckoutState::Completed);
    let (status, body) = app.request(Method::POST, &verify_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["subscription"]["status"], "active");
    assert_eq!(body["subscription"]["package"]["slug"], "gold");
    assert_eq!(
        body["subscription"]["current_period_end"],
        "2026-05-01T10:00:00Z"
    );

    let (_, body) = app
        .request(Method::GET, "/api/v1/billing/subscription", Some(&token), None)
        .await;
    assert_eq!(body["subscription"]["package_id"], GOLD_PACKAGE_ID.to_string());

    // A second verify is answered from the ledger
    let status_calls = app.gateway.status_calls();
    let (status, body) = app.request(Method::POST, &verify_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(app.gateway.status_calls(), status_calls);
}

#[tokio::test]
async fn checkout_requires_a_live_session() {
    let app = spawn_app().await;
    let body = json!({
        "package_id": GOLD_PACKAGE_ID,
        "success_url": "https://app.keyhaven.test/billing/success",
        "cancel_url": "https://app.keyhaven.test/billing/cancel"
    });

    let (status, _) = app
        .request(Method::POST, "/api/v1/billing/checkout", None, Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = app.login("buyer@keyhaven.test").await;
    let (_, me) = app.request(Method::GET, "/api/v1/auth/me", Some(&token), None).await;
    let buyer_id: Uuid = me["user_id"].as_str().unwrap().parse().unwrap();

    app.clock.advance(Duration::hours(24));
    let (status, body) = app
        .request(Method::POST, "/api/v1/billing/checkout", Some(&token), Some(body))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 401);

    assert_eq!(app.gateway.create_calls(), 0);
    assert!(app.ledger_store.payments_for_user(buyer_id).await.is_empty());
}

#[tokio::test]
async fn foreign_payment_is_forbidden() {
    let app = spawn_app().await;
    let buyer = app.login("buyer@keyhaven.test").await;
    let other = app.login("other@keyhaven.test").await;

    let payment_id = app.checkout(&buyer).await;
    let (status, _) = app
        .request(
            Method::POST,
            &format!("/api/v1/billing/payments/{payment_id}/verify"),
            Some(&other),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/api/v1/billing/payments/{}/verify", Uuid::new_v4()),
            Some(&other),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn gateway_outage_maps_to_bad_gateway() {
    let app = spawn_app().await;
    let token = app.login("buyer@keyhaven.test").await;

    app.gateway.fail_create(true);
    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/billing/checkout",
            Some(&token),
            Some(json!({
                "package_id": GOLD_PACKAGE_ID,
                "success_url": "https://app.keyhaven.test/ok",
                "cancel_url": "https://app.keyhaven.test/cancel"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], 502);
}

#[tokio::test]
async fn signed_webhook_settles_payment() {
    let app = spawn_app().await;
    let token = app.login("buyer@keyhaven.test").await;
    app.checkout(&token).await;
    app.gateway.set_state(RemoteCheckoutState::Completed);

    let checkout_id = app.gateway.last_checkout_id().unwrap();
    let payload = json!({
        "id": "evt_100",
        "type": "checkout.completed",
        "data": { "checkout_id": checkout_id }
    })
    .to_string();
    let timestamp = app.clock.now().unix_timestamp();

    let bad = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/webhooks/gateway")
        .header("Gateway-Signature", format!("t={timestamp},v1=00ff"))
        .body(Body::from(payload.clone()))
        .unwrap();
    let (status, _) = app.send(bad).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    for _ in 0..2 {
        let signature = sign_payload(WEBHOOK_SECRET, timestamp, &payload).unwrap();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/webhooks/gateway")
            .header("Gateway-Signature", signature)
            .body(Body::from(payload.clone()))
            .unwrap();
        let (status, body) = app.send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["received"], true);
    }

    let (_, body) = app
        .request(Method::GET, "/api/v1/billing/subscription", Some(&token), None)
        .await;
    assert_eq!(body["subscription"]["status"], "active");

    let buyer_id = body["subscription"]["user_id"].as_str().unwrap().parse().unwrap();
    assert_eq!(app.ledger_store.subscriptions_for_user(buyer_id).await.len(), 1);
}

#[tokio::test]
async fn refunds_are_admin_only() {
    let app = spawn_app().await;
    let buyer = app.login("buyer@keyhaven.test").await;
    let admin = app.login("admin@keyhaven.test").await;

    let payment_id = app.checkout(&buyer).await;
    let refund_uri = format!("/api/v1/billing/payments/{payment_id}/refund");

    // Pending payments cannot be refunded
    let (status, _) = app.request(Method::POST, &refund_uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.gateway.set_state(RemoteCheckoutState::Completed);
    app.request(
        Method::POST,
        &format!("/api/v1/billing/payments/{payment_id}/verify"),
        Some(&buyer),
        None,
    )
    .await;

    let (status, _) = app.request(Method::POST, &refund_uri, Some(&buyer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.request(Method::POST, &refund_uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "refunded");
}
