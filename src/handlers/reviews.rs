use axum::{
    extract::{Path, State},
    response::{Json, Response},
    routing::{get, post, put},
    Router,
};
use uuid::Uuid;

use super::common::{created_response, no_content_response, validate_input};
use crate::{
    auth::AuthUser,
    entities::review,
    errors::ServiceError,
    services::reviews::{NewReview, ReviewEdit},
    ApiResponse, ApiResult, AppState,
};

/// Writing reviews requires a signed-in customer.
pub fn review_routes() -> Router<AppState> {
    Router::new()
        .route("/reviews", post(add_review))
        .route("/reviews/:id", put(edit_review).delete(delete_review))
}

/// Reading reviews is open to anyone browsing the catalogue.
pub fn product_review_routes() -> Router<AppState> {
    Router::new().route("/products/:product_id/reviews", get(list_product_reviews))
}

pub async fn add_review(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<NewReview>,
) -> Result<Response, ServiceError> {
    validate_input(&request)?;
    let saved = state
        .services
        .reviews
        .add(auth_user.user_id, request)
        .await?;
    Ok(created_response(saved))
}

pub async fn edit_review(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<ReviewEdit>,
) -> ApiResult<review::Model> {
    validate_input(&request)?;
    let saved = state
        .services
        .reviews
        .edit(auth_user.user_id, id, request)
        .await?;
    Ok(Json(ApiResponse::success(saved)))
}

pub async fn delete_review(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    state
        .services
        .reviews
        .delete(auth_user.user_id, id)
        .await?;
    Ok(no_content_response())
}

pub async fn list_product_reviews(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> ApiResult<Vec<review::Model>> {
    let reviews = state.services.reviews.list_for_product(product_id).await?;
    Ok(Json(ApiResponse::success(reviews)))
}
