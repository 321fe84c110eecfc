use axum::{
    extract::{Path, State},
    response::{Json, Response},
    routing::{delete, get},
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::common::{created_response, no_content_response};
use crate::{
    auth::AuthUser, errors::ServiceError, services::wishlist::WishlistEntry, ApiResponse,
    ApiResult, AppState,
};

#[derive(Debug, Deserialize, Serialize)]
pub struct AddWishlistRequest {
    pub product_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ClearedWishlist {
    pub removed: u64,
}

pub fn wishlist_routes() -> Router<AppState> {
    Router::new()
        .route("/wishlist", get(list).post(add).delete(clear))
        .route("/wishlist/:product_id", delete(remove))
}

pub async fn list(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Vec<WishlistEntry>> {
    let entries = state.services.wishlist.list(auth_user.user_id).await?;
    Ok(Json(ApiResponse::success(entries)))
}

pub async fn add(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<AddWishlistRequest>,
) -> Result<Response, ServiceError> {
    state
        .services
        .wishlist
        .add(auth_user.user_id, request.product_id)
        .await?;
    Ok(created_response(request))
}

pub async fn remove(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    state
        .services
        .wishlist
        .remove(auth_user.user_id, product_id)
        .await?;
    Ok(no_content_response())
}

pub async fn clear(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<ClearedWishlist> {
    let removed = state.services.wishlist.clear(auth_user.user_id).await?;
    Ok(Json(ApiResponse::success(ClearedWishlist { removed })))
}
