use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::common::{created_response, validate_input};
use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::orders::{OrderDetail, OrderSummary, PlaceOrderOutcome, PlaceOrderRequest},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct ReturnOrderRequest {
    #[validate(length(min = 1, max = 500, message = "Return reason must be 1-500 characters"))]
    pub reason: String,
}

/// Customer order routes; expected to sit behind `with_auth()`.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(place_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/return", post(return_order))
}

/// Place an order from the caller's cart.
///
/// COD and wallet placements answer `201` with the order summary. Gateway placements
/// answer `200` with the approval URL the customer must visit.
pub async fn place_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&request)?;

    let outcome = state
        .services
        .orders
        .place_order(auth_user.user_id, request)
        .await?;

    Ok(match outcome {
        PlaceOrderOutcome::Placed(summary) => {
            info!(order_id = %summary.id, "order placed via API");
            created_response(PlaceOrderOutcome::Placed(summary))
        }
        awaiting @ PlaceOrderOutcome::AwaitingPayment { .. } => {
            (StatusCode::OK, Json(ApiResponse::success(awaiting))).into_response()
        }
    })
}

pub async fn list_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Vec<OrderDetail>> {
    let orders = state.services.orders.list_orders(auth_user.user_id).await?;
    Ok(Json(ApiResponse::success(orders)))
}

pub async fn get_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderDetail> {
    let order = state
        .services
        .orders
        .get_order(auth_user.user_id, id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderSummary> {
    let order = state
        .services
        .orders
        .cancel_order(auth_user.user_id, id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn return_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<ReturnOrderRequest>,
) -> ApiResult<OrderSummary> {
    validate_input(&request)?;
    let order = state
        .services
        .orders
        .return_order(auth_user.user_id, id, &request.reason)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}
