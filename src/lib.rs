//! Storefront API Library
//!
//! Cart, wishlist, addresses, coupons and the order placement and settlement engine
//! behind the storefront checkout.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;
pub mod tracing;

use axum::{
    extract::{Extension, State},
    response::Json,
    routing::get,
    Router,
};
use chrono::Utc;
use http::HeaderValue;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};

use crate::auth::{AuthRouterExt, AuthService, ADMIN_ROLE};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
    pub auth: Arc<AuthService>,
}

// Common response wrappers
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[test]
    fn success_outside_a_request_has_no_id() {
        let response = ApiResponse::success(1);
        assert!(response.success);
        assert!(response.meta.expect("metadata expected").request_id.is_none());
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Every versioned route, relative to `/api/v1`.
pub fn api_v1_routes() -> Router<AppState> {
    let customer = Router::new()
        .merge(handlers::orders::order_routes())
        .merge(handlers::cart::cart_routes())
        .merge(handlers::wishlist::wishlist_routes())
        .merge(handlers::addresses::address_routes())
        .merge(handlers::reviews::review_routes())
        .merge(handlers::wallet::wallet_routes())
        .merge(handlers::coupons::coupon_routes())
        .with_auth();

    let admin = handlers::admin::admin_routes().with_role(ADMIN_ROLE);

    Router::new()
        // Status and health endpoints
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        // Gateway redirects carry no bearer token
        .merge(handlers::payments::payment_routes())
        .merge(handlers::reviews::product_review_routes())
        .merge(customer)
        .merge(admin)
}

/// Full application router: `/api/v1` plus the cross-cutting layers.
pub fn app_router(state: AppState) -> Router {
    let cors_layer = cors_layer(&state.config);
    let timeout = Duration::from_secs(state.config.request_timeout_secs);
    let auth = state.auth.clone();

    Router::new()
        .route("/", get(|| async { "storefront-api up" }))
        .nest("/api/v1", api_v1_routes())
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        .layer(TimeoutLayer::new(timeout))
        .layer(cors_layer)
        // Inject AuthService into request extensions for auth middleware
        .layer(Extension(auth))
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            crate::tracing::request_id_middleware,
        ))
        .with_state(state)
}

fn cors_layer(cfg: &config::AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cfg
        .allowed_origins()
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if origins.is_empty() {
        if cfg.is_production() {
            ::tracing::warn!("No CORS origins configured in production; cross-origin requests are refused");
            return CorsLayer::new();
        }
        return CorsLayer::permissive();
    }

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn api_status(State(state): State<AppState>) -> ApiResult<Value> {
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "storefront-api",
        "timestamp": Utc::now().to_rfc3339(),
        "environment": state.config.environment,
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(State(state): State<AppState>) -> ApiResult<Value> {
    // Check database connectivity
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(e) => {
            ::tracing::warn!(error = %e, "database ping failed");
            "unhealthy"
        }
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}

pub mod prelude {
    pub use crate::db::*;
    pub use crate::errors::*;
    pub use crate::events::*;
    pub use crate::tracing::*;
    pub use crate::{ApiResponse, ApiResult, AppState};
}
