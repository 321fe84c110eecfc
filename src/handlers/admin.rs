use axum::{
    extract::{Path, State},
    response::Json,
    routing::put,
    Router,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::AuthUser, entities::order::OrderStatus, services::orders::OrderSummary, ApiResponse,
    ApiResult, AppState,
};

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

/// Back-office routes; expected to sit behind `with_role("admin")`.
pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/admin/orders/:id/status", put(update_order_status))
}

pub async fn update_order_status(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> ApiResult<OrderSummary> {
    info!(admin = %auth_user.user_id, order_id = %id, status = ?request.status, "admin status change");
    let order = state
        .services
        .orders
        .update_status(id, request.status)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}
