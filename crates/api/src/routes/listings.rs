//! Listing write authorization

use axum::{
    extract::{Extension, State},
    Json,
};
use keyhaven_shared::Identity;
use serde::Serialize;

use crate::{
    auth::{ListingAction, ListingWrite},
    error::ApiResult,
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct AuthorizeWriteResponse {
    pub allowed: bool,
    pub action: ListingAction,
}

/// POST /api/v1/listings/authorize
///
/// A refusal comes back as 403 with the reason, a missing listing as 404.
pub async fn authorize_write(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(write): Json<ListingWrite>,
) -> ApiResult<Json<AuthorizeWriteResponse>> {
    state
        .listings
        .authorize_listing_write(&identity, write)
        .await?;

    Ok(Json(AuthorizeWriteResponse {
        allowed: true,
        action: write.action(),
    }))
}
