use axum::{
    extract::{Path, State},
    response::{Json, Response},
    routing::{get, put},
    Router,
};
use uuid::Uuid;

use super::common::{created_response, no_content_response, validate_input};
use crate::{
    auth::AuthUser,
    entities::address,
    errors::ServiceError,
    services::addresses::NewAddress,
    ApiResponse, ApiResult, AppState,
};

pub fn address_routes() -> Router<AppState> {
    Router::new()
        .route("/addresses", get(list_addresses).post(add_address))
        .route("/addresses/:id", put(update_address).delete(delete_address))
}

pub async fn list_addresses(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Vec<address::Model>> {
    let addresses = state.services.addresses.list(auth_user.user_id).await?;
    Ok(Json(ApiResponse::success(addresses)))
}

pub async fn add_address(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<NewAddress>,
) -> Result<Response, ServiceError> {
    validate_input(&request)?;
    let saved = state
        .services
        .addresses
        .add(auth_user.user_id, request)
        .await?;
    Ok(created_response(saved))
}

pub async fn update_address(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<NewAddress>,
) -> ApiResult<address::Model> {
    validate_input(&request)?;
    let saved = state
        .services
        .addresses
        .update(auth_user.user_id, id, request)
        .await?;
    Ok(Json(ApiResponse::success(saved)))
}

pub async fn delete_address(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    state
        .services
        .addresses
        .delete(auth_user.user_id, id)
        .await?;
    Ok(no_content_response())
}
