use axum::{extract::State, response::Json, routing::get, Router};

use crate::{entities::coupon, ApiResponse, ApiResult, AppState};

pub fn coupon_routes() -> Router<AppState> {
    Router::new().route("/coupons", get(list_coupons))
}

/// Coupons a shopper can apply right now.
pub async fn list_coupons(State(state): State<AppState>) -> ApiResult<Vec<coupon::Model>> {
    let coupons = state.services.coupons.list_available().await?;
    Ok(Json(ApiResponse::success(coupons)))
}
