mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;
use storefront_api::entities::{
    wallet_transaction, Order, OrderStatus, PaymentStatus, TransactionType, WalletTransaction,
};
use uuid::Uuid;

/// Places a single-line order and returns its id.
async fn place(app: &TestApp, method: &str, price: rust_decimal::Decimal, qty: i32) -> (Uuid, Uuid) {
    let product = app.seed_product("Backpack", price, 10).await;
    let address = app.seed_address(app.user_id).await;
    app.seed_cart_line(app.user_id, &product, qty).await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/orders",
            Some(json!({ "address_id": address.id, "method": method })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    let id = Uuid::parse_str(body["data"]["id"].as_str().unwrap()).unwrap();
    (id, product.id)
}

async fn admin_set_status(app: &TestApp, order_id: Uuid, status: &str) -> StatusCode {
    let admin = app.admin_token();
    app.request(
        Method::PUT,
        &format!("/api/v1/admin/orders/{}/status", order_id),
        Some(json!({ "status": status })),
        Some(&admin),
    )
    .await
    .status()
}

#[tokio::test]
async fn canceling_cod_order_restores_stock() {
    let app = TestApp::new().await;
    let (order_id, product_id) = place(&app, "COD", dec!(40), 3).await;
    assert_eq!(app.stock_of(product_id).await, 7);

    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{}/cancel", order_id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["status"], "Canceled");
    assert_eq!(body["data"]["payment_status"], "Failed");

    assert_eq!(app.stock_of(product_id).await, 10);
    let wallet = app
        .state
        .services
        .wallet
        .view_wallet(app.user_id)
        .await
        .unwrap();
    assert_eq!(wallet.balance, dec!(0));
}

#[tokio::test]
async fn canceling_wallet_order_refunds_to_wallet() {
    let app = TestApp::new().await;
    app.seed_wallet(app.user_id, dec!(100)).await;
    let (order_id, _) = place(&app, "Wallet", dec!(30), 2).await;

    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{}/cancel", order_id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let wallet = app
        .state
        .services
        .wallet
        .view_wallet(app.user_id)
        .await
        .unwrap();
    assert_eq!(wallet.balance, dec!(100));

    let credits = WalletTransaction::find()
        .filter(wallet_transaction::Column::UserId.eq(app.user_id))
        .filter(wallet_transaction::Column::TransactionType.eq(TransactionType::Credit))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(credits.len(), 1);
    assert_eq!(credits[0].amount, dec!(60));
    assert!(credits[0].description.starts_with("Refund for order ORD-"));
}

#[tokio::test]
async fn delivered_order_cannot_be_canceled() {
    let app = TestApp::new().await;
    let (order_id, product_id) = place(&app, "COD", dec!(20), 1).await;
    assert_eq!(admin_set_status(&app, order_id, "Shipped").await, StatusCode::OK);
    assert_eq!(admin_set_status(&app, order_id, "Delivered").await, StatusCode::OK);

    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{}/cancel", order_id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let order = Order::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Delivered);
    // Delivering a cash order settles its payment.
    assert_eq!(order.payment_status, PaymentStatus::Success);
    assert_eq!(app.stock_of(product_id).await, 9);
}

#[tokio::test]
async fn delivered_order_can_be_returned_once() {
    let app = TestApp::new().await;
    let (order_id, product_id) = place(&app, "COD", dec!(20), 2).await;

    let early = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{}/return", order_id),
            Some(json!({ "reason": "Changed my mind" })),
        )
        .await;
    assert_eq!(early.status(), StatusCode::CONFLICT);

    admin_set_status(&app, order_id, "Shipped").await;
    admin_set_status(&app, order_id, "Delivered").await;

    let blank = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{}/return", order_id),
            Some(json!({ "reason": "   " })),
        )
        .await;
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{}/return", order_id),
            Some(json!({ "reason": "Arrived damaged" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["status"], "Returned");
    assert_eq!(body["data"]["return_reason"], "Arrived damaged");
    assert_eq!(app.stock_of(product_id).await, 10);

    let again = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{}/return", order_id),
            Some(json!({ "reason": "Arrived damaged" })),
        )
        .await;
    assert_eq!(again.status(), StatusCode::CONFLICT);
    assert_eq!(app.stock_of(product_id).await, 10);
}

#[tokio::test]
async fn admin_routes_require_admin_role() {
    let app = TestApp::new().await;
    let (order_id, _) = place(&app, "COD", dec!(20), 1).await;

    let response = app
        .request_authenticated(
            Method::PUT,
            &format!("/api/v1/admin/orders/{}/status", order_id),
            Some(json!({ "status": "Shipped" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let order = Order::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn admin_cannot_skip_fulfilment_steps() {
    let app = TestApp::new().await;
    let (order_id, _) = place(&app, "COD", dec!(20), 1).await;
    assert_eq!(
        admin_set_status(&app, order_id, "Delivered").await,
        StatusCode::CONFLICT
    );
}

#[tokio::test]
async fn admin_cancellation_runs_refund() {
    let app = TestApp::new().await;
    app.seed_wallet(app.user_id, dec!(50)).await;
    let (order_id, product_id) = place(&app, "Wallet", dec!(25), 2).await;

    assert_eq!(admin_set_status(&app, order_id, "Canceled").await, StatusCode::OK);
    assert_eq!(app.stock_of(product_id).await, 10);
    let wallet = app
        .state
        .services
        .wallet
        .view_wallet(app.user_id)
        .await
        .unwrap();
    assert_eq!(wallet.balance, dec!(50));
}

#[tokio::test]
async fn canceling_gateway_order_refunds_into_new_wallet() {
    let app = TestApp::new().await;
    let product = app.seed_product("Camera", dec!(200), 4).await;
    let address = app.seed_address(app.user_id).await;
    app.seed_cart_line(app.user_id, &product, 2).await;

    let placed = app
        .request_authenticated(
            Method::POST,
            "/api/v1/orders",
            Some(json!({ "address_id": address.id, "method": "PayPal" })),
        )
        .await;
    assert_eq!(placed.status(), StatusCode::OK);
    let token = response_json(placed).await["data"]["token"]
        .as_str()
        .unwrap()
        .to_string();

    let confirmed = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/gateway/confirm?token={}&PayerID=P1", token),
            None,
            None,
        )
        .await;
    assert_eq!(confirmed.status(), StatusCode::OK);
    let order_id = Uuid::parse_str(
        response_json(confirmed).await["data"]["id"]
            .as_str()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(app.stock_of(product.id).await, 2);
    assert!(app.wallet_of(app.user_id).await.is_none());

    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{}/cancel", order_id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["status"], "Canceled");
    assert_eq!(body["data"]["payment_status"], "Success");

    let wallet = app.wallet_of(app.user_id).await.expect("wallet created by refund");
    assert_eq!(wallet.balance, dec!(400));

    let credits = WalletTransaction::find()
        .filter(wallet_transaction::Column::UserId.eq(app.user_id))
        .filter(wallet_transaction::Column::TransactionType.eq(TransactionType::Credit))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(credits.len(), 1);
    assert_eq!(credits[0].amount, dec!(400));
    assert_eq!(credits[0].order_id, Some(order_id));
    assert!(credits[0].description.starts_with("Refund for order ORD-"));

    assert_eq!(app.stock_of(product.id).await, 4);
}
