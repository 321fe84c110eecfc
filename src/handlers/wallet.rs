use axum::{extract::State, response::Json, routing::get, Router};

use crate::{
    auth::AuthUser, entities::wallet_transaction, services::wallet::WalletView, ApiResponse,
    ApiResult, AppState,
};

pub fn wallet_routes() -> Router<AppState> {
    Router::new()
        .route("/wallet", get(view_wallet))
        .route("/wallet/transactions", get(list_transactions))
}

pub async fn view_wallet(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<WalletView> {
    let wallet = state.services.wallet.view_wallet(auth_user.user_id).await?;
    Ok(Json(ApiResponse::success(wallet)))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Vec<wallet_transaction::Model>> {
    let transactions = state
        .services
        .wallet
        .list_transactions(auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(transactions)))
}
