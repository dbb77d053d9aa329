//! Login, logout and identity routes

use axum::{
    extract::{Extension, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    Json,
};
use keyhaven_shared::Identity;
use serde::{Deserialize, Serialize};

use crate::{
    auth::{AuthError, IssuedSession},
    error::ApiResult,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutAllResponse {
    pub revoked: u64,
}

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<IssuedSession>> {
    let session = state.sessions.login(&req.email, &req.password).await?;
    Ok(Json(session))
}

/// POST /api/v1/auth/logout
///
/// Revokes the session that authenticated this request.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<StatusCode> {
    let credential = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingAuth)?;

    state.sessions.logout(credential).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/auth/logout-all
pub async fn logout_all(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<LogoutAllResponse>> {
    let revoked = state.sessions.logout_everywhere(&identity).await?;
    Ok(Json(LogoutAllResponse { revoked }))
}

/// GET /api/v1/auth/me
pub async fn me(Extension(identity): Extension<Identity>) -> Json<Identity> {
    Json(identity)
}
