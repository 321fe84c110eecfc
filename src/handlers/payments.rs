//! Browser redirects coming back from the payment gateway.
//!
//! These routes are public: the processor token is the only credential, and a token
//! can be settled or abandoned exactly once.

use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{errors::ServiceError, services::orders::OrderSummary, ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct ConfirmQuery {
    pub token: Option<String>,
    #[serde(rename = "PayerID")]
    pub payer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelQuery {
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AbandonedPayment {
    pub token: String,
    pub status: &'static str,
}

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/payments/gateway/confirm", get(confirm_payment))
        .route("/payments/gateway/cancel", get(cancel_payment))
}

fn require_token(token: Option<String>) -> Result<String, ServiceError> {
    token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ServiceError::ValidationError("token is required".to_string()))
}

pub async fn confirm_payment(
    State(state): State<AppState>,
    Query(query): Query<ConfirmQuery>,
) -> ApiResult<OrderSummary> {
    let token = require_token(query.token)?;
    let order = state
        .services
        .reconciler
        .capture(&token, query.payer_id.as_deref())
        .await?;
    info!(order_id = %order.id, "gateway payment confirmed");
    Ok(Json(ApiResponse::success(order.into())))
}

pub async fn cancel_payment(
    State(state): State<AppState>,
    Query(query): Query<CancelQuery>,
) -> ApiResult<AbandonedPayment> {
    let token = require_token(query.token)?;
    state.services.reconciler.abandon(&token).await?;
    Ok(Json(ApiResponse::success(AbandonedPayment {
        token,
        status: "abandoned",
    })))
}
