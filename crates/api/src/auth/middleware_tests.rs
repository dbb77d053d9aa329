//! Unit tests for authentication middleware
//!
//! Tests cover:
//! - Missing, malformed and empty Authorization headers
//! - Valid sessions with any casing of the Bearer scheme
//! - Expired sessions, inactive users and revoked tokens

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        extract::Extension,
        http::{header::AUTHORIZATION, Request, StatusCode},
        middleware,
        routing::get,
        Json, Router,
    };
    use keyhaven_billing::{testing::RecordingGateway, BillingService, GatewayConfig, MemoryLedgerStore};
    use keyhaven_shared::{FixedClock, Identity, Role};
    use serde_json::Value;
    use time::{macros::datetime, Duration};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::super::middleware::require_auth;
    use super::super::ownership::{ListingGuard, MemoryOwnershipDirectory};
    use super::super::password::hash_password;
    use super::super::sessions::SessionResolver;
    use super::super::store::{MemoryCredentialStore, UserRecord};
    use crate::config::Config;
    use crate::state::AppState;

    const PASSWORD: &str = "hunter2-but-longer";

    struct Fixture {
        app: Router,
        sessions: SessionResolver,
        store: MemoryCredentialStore,
        clock: Arc<FixedClock>,
        user: UserRecord,
    }

    fn test_config() -> Config {
        Config {
            database_url: "postgres://unused".to_string(),
            bind_address: "127.0.0.1:0".to_string(),
            session_ttl: Duration::hours(1),
            gateway: GatewayConfig {
                base_url: "https://pay.example.test".to_string(),
                secret_key: "sk_test".to_string(),
                webhook_secret: "whsec_test".to_string(),
                timeout: std::time::Duration::from_secs(5),
            },
            allowed_origins: Vec::new(),
        }
    }

    async fn whoami(Extension(identity): Extension<Identity>) -> Json<Identity> {
        Json(identity)
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(datetime!(2026-03-01 09:00 UTC)));
        let store = MemoryCredentialStore::new();
        let agent_id = Uuid::new_v4();
        let user = UserRecord {
            id: Uuid::new_v4(),
            email: "agent@example.com".to_string(),
            password_hash: hash_password(PASSWORD).unwrap(),
            role: Role::Agent,
            agent_id: Some(agent_id),
            agency_id: None,
            contractor_id: None,
            is_active: true,
            is_verified: true,
        };
        store.insert_user(user.clone()).await;

        let sessions = SessionResolver::new(Arc::new(store.clone()), clock.clone(), Duration::hours(1));
        let billing = BillingService::from_parts(
            Arc::new(MemoryLedgerStore::new()),
            Arc::new(RecordingGateway::new()),
            clock.clone(),
            "whsec_test",
        );
        let state = AppState::from_parts(
            test_config(),
            sessions.clone(),
            ListingGuard::new(Arc::new(MemoryOwnershipDirectory::new())),
            billing,
        );

        let app = Router::new()
            .route("/whoami", get(whoami))
            .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
            .with_state(state);

        Fixture {
            app,
            sessions,
            store,
            clock,
            user,
        }
    }

    async fn call(app: &Router, authorization: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri("/whoami");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        let response = app
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let f = fixture().await;
        let (status, body) = call(&f.app, None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], 401);
    }

    #[tokio::test]
    async fn test_empty_bearer_is_unauthorized() {
        let f = fixture().await;
        let (status, _) = call(&f.app, Some("Bearer   ")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_session_attaches_identity() {
        let f = fixture().await;
        let issued = f.sessions.login(&f.user.email, PASSWORD).await.unwrap();

        for header in [
            format!("Bearer {}", issued.token),
            format!("bearer {}", issued.token),
            format!("  BEARER {}  ", issued.token),
            issued.token.clone(),
        ] {
            let (status, body) = call(&f.app, Some(&header)).await;
            assert_eq!(status, StatusCode::OK, "{header}");
            assert_eq!(body["user_id"], f.user.id.to_string());
            assert_eq!(body["role"], "AGENT");
            assert_eq!(body["agent_id"], f.user.agent_id.unwrap().to_string());
            assert!(body.get("agency_id").is_none());
        }
    }

    #[tokio::test]
    async fn test_unknown_token_is_unauthorized() {
        let f = fixture().await;
        let (status, body) = call(&f.app, Some("Bearer deadbeef")).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid or expired token");
    }

    #[tokio::test]
    async fn test_expired_session_is_unauthorized() {
        let f = fixture().await;
        let issued = f.sessions.login(&f.user.email, PASSWORD).await.unwrap();
        let header = format!("Bearer {}", issued.token);

        f.clock.advance(Duration::hours(1) - Duration::milliseconds(1));
        assert_eq!(call(&f.app, Some(&header)).await.0, StatusCode::OK);

        f.clock.advance(Duration::milliseconds(1));
        assert_eq!(call(&f.app, Some(&header)).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_deactivated_user_loses_access_immediately() {
        let f = fixture().await;
        let issued = f.sessions.login(&f.user.email, PASSWORD).await.unwrap();
        let header = format!("Bearer {}", issued.token);
        assert_eq!(call(&f.app, Some(&header)).await.0, StatusCode::OK);

        f.store.set_user_active(f.user.id, false).await;
        assert_eq!(call(&f.app, Some(&header)).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_revoked_session_fails_on_next_request() {
        let f = fixture().await;
        let issued = f.sessions.login(&f.user.email, PASSWORD).await.unwrap();
        let header = format!("Bearer {}", issued.token);
        assert_eq!(call(&f.app, Some(&header)).await.0, StatusCode::OK);

        f.sessions.logout(&header).await.unwrap();
        assert_eq!(call(&f.app, Some(&header)).await.0, StatusCode::UNAUTHORIZED);
    }
}
