use axum::{
    extract::{Path, State},
    response::{Json, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::common::{no_content_response, validate_input};
use crate::{
    auth::AuthUser, errors::ServiceError, services::cart::CartView, ApiResponse, ApiResult,
    AppState,
};

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct AddCartItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct UpdateCartItemRequest {
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/cart", get(view_cart))
        .route("/cart/items", post(add_item))
        .route("/cart/items/:product_id", put(update_item).delete(remove_item))
}

pub async fn view_cart(State(state): State<AppState>, auth_user: AuthUser) -> ApiResult<CartView> {
    let cart = state.services.cart.view_cart(auth_user.user_id).await?;
    Ok(Json(ApiResponse::success(cart)))
}

pub async fn add_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<AddCartItemRequest>,
) -> ApiResult<CartView> {
    validate_input(&request)?;
    let cart = state
        .services
        .cart
        .add_item(auth_user.user_id, request.product_id, request.quantity)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

pub async fn update_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(product_id): Path<Uuid>,
    Json(request): Json<UpdateCartItemRequest>,
) -> ApiResult<CartView> {
    validate_input(&request)?;
    let cart = state
        .services
        .cart
        .update_quantity(auth_user.user_id, product_id, request.quantity)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

pub async fn remove_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    state
        .services
        .cart
        .remove_item(auth_user.user_id, product_id)
        .await?;
    Ok(no_content_response())
}
