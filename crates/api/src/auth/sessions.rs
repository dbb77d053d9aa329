//! Session resolution
//!
//! Turns a presented bearer credential into an [`Identity`]. Every call goes
//! to the credential store: nothing is cached, so a revoked or expired
//! session stops working on the very next request.

use std::sync::Arc;

use keyhaven_shared::{Clock, Identity};
use serde::Serialize;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use super::middleware::AuthError;
use super::password;
use super::store::{CredentialStore, NewSession};

/// Random bytes in an issued token (256 bits)
const TOKEN_BYTES: usize = 32;

/// PHC hash checked when the email is unknown so both failures cost the same
const DUMMY_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$2bqwd1Gd9Cjz4g5HnWM0Vv6B1qM3DkYV0d7m1yW5v1k";

/// Token returned once at login; only its digest is stored
#[derive(Debug, Clone, Serialize)]
pub struct IssuedSession {
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub identity: Identity,
}

/// Hex SHA-256 of a raw token, the form sessions are keyed by
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn generate_token() -> String {
    hex::encode(rand::random::<[u8; TOKEN_BYTES]>())
}

/// Strip a case-insensitive `Bearer` scheme and surrounding whitespace
pub fn strip_bearer(credential: &str) -> &str {
    let trimmed = credential.trim_start();
    let token = match trimmed.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("bearer ") => &trimmed[7..],
        _ => trimmed,
    };
    token.trim()
}

#[derive(Clone)]
pub struct SessionResolver {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SessionResolver {
    pub fn new(store: Arc<dyn CredentialStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    /// Authenticate a bearer credential
    pub async fn resolve(&self, credential: &str) -> Result<Identity, AuthError> {
        let token = strip_bearer(credential);
        if token.is_empty() {
            return Err(AuthError::MissingAuth);
        }

        let Some(session) = self.store.find_session(&hash_token(token)).await? else {
            return Err(AuthError::InvalidToken);
        };

        if session.expires_at <= self.clock.now() {
            tracing::debug!(user_id = %session.user.id, "Session expired");
            return Err(AuthError::InvalidToken);
        }

        if !session.user.is_active {
            tracing::warn!(user_id = %session.user.id, "Session presented for inactive user");
            return Err(AuthError::InvalidToken);
        }

        Ok(session.user.identity())
    }

    /// Verify a password and issue a new session
    pub async fn login(&self, email: &str, password: &str) -> Result<IssuedSession, AuthError> {
        let email = email.trim();
        let user = self.store.find_user_by_email(email).await?;

        let Some(user) = user else {
            let _ = password::verify_password(password, DUMMY_HASH);
            tracing::info!("Login failed: unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        if !password::verify_password(password, &user.password_hash) {
            tracing::info!(user_id = %user.id, "Login failed: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_active {
            tracing::warn!(user_id = %user.id, "Login refused for inactive user");
            return Err(AuthError::InvalidCredentials);
        }

        let token = generate_token();
        let now = self.clock.now();
        let expires_at = now + self.ttl;

        self.store
            .insert_session(&NewSession {
                token_hash: hash_token(&token),
                user_id: user.id,
                expires_at,
                created_at: now,
            })
            .await?;

        tracing::info!(user_id = %user.id, role = %user.role, "Session issued");

        Ok(IssuedSession {
            token,
            expires_at,
            identity: user.identity(),
        })
    }

    /// Revoke the presented session. Unknown tokens are `InvalidToken`.
    pub async fn logout(&self, credential: &str) -> Result<(), AuthError> {
        let token = strip_bearer(credential);
        if token.is_empty() {
            return Err(AuthError::MissingAuth);
        }

        if self.store.revoke_session(&hash_token(token)).await? {
            Ok(())
        } else {
            Err(AuthError::InvalidToken)
        }
    }

    /// Revoke every session a user holds
    pub async fn logout_everywhere(&self, identity: &Identity) -> Result<u64, AuthError> {
        let revoked = self.store.revoke_user_sessions(identity.user_id).await?;
        tracing::info!(user_id = %identity.user_id, revoked, "All sessions revoked");
        Ok(revoked)
    }

    /// Delete sessions that can no longer authenticate
    pub async fn prune_expired(&self) -> Result<u64, AuthError> {
        self.store.delete_expired_sessions(self.clock.now()).await
    }
}
