mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal_macros::dec;
use storefront_api::{
    errors::ServiceError,
    services::{
        inventory::{InventoryLedger, StockLine},
        orders::PlaceOrderRequest,
    },
};
use uuid::Uuid;

#[tokio::test]
async fn concurrent_placements_never_oversell() {
    // Several connections, so placements really interleave their transactions.
    let app = TestApp::with_pool_size(4).await;
    let product = app.seed_product("Limited Print", dec!(25), 3).await;

    let mut shoppers = Vec::new();
    for _ in 0..8 {
        let user_id = Uuid::new_v4();
        let address = app.seed_address(user_id).await;
        app.seed_cart_line(user_id, &product, 1).await;
        shoppers.push((user_id, address.id));
    }

    let mut tasks = Vec::new();
    for (user_id, address_id) in shoppers {
        let orders = app.state.services.orders.clone();
        tasks.push(tokio::spawn(async move {
            orders
                .place_order(
                    user_id,
                    PlaceOrderRequest {
                        address_id,
                        coupon_code: None,
                        method: "COD".to_string(),
                    },
                )
                .await
        }));
    }

    let mut placed = 0;
    for task in tasks {
        match task.await.expect("task panicked") {
            Ok(_) => placed += 1,
            Err(e) => assert_matches!(e, ServiceError::InsufficientStock(_)),
        }
    }

    assert_eq!(placed, 3);
    assert_eq!(app.stock_of(product.id).await, 0);
    assert_eq!(app.orders().await.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_reservations_stop_at_zero() {
    let app = TestApp::with_pool_size(4).await;
    let product = app.seed_product("Drop Sneaker", dec!(90), 5).await;

    let mut tasks = Vec::new();
    for _ in 0..12 {
        let db = app.state.db.clone();
        let product_id = product.id;
        tasks.push(tokio::spawn(async move {
            use sea_orm::TransactionTrait;
            let txn = db.begin().await?;
            InventoryLedger::reserve_all(
                &txn,
                &[StockLine {
                    product_id,
                    quantity: 1,
                }],
            )
            .await?;
            txn.commit().await?;
            Ok::<_, ServiceError>(())
        }));
    }

    let mut reserved = 0;
    for task in tasks {
        match task.await.expect("task panicked") {
            Ok(()) => reserved += 1,
            Err(e) => assert_matches!(e, ServiceError::InsufficientStock(_)),
        }
    }

    assert_eq!(reserved, 5);
    assert_eq!(app.stock_of(product.id).await, 0);
}

#[tokio::test]
async fn reservation_is_all_or_nothing() {
    let app = TestApp::new().await;
    let plenty = app.seed_product("Socks", dec!(5), 10).await;
    let scarce = app.seed_product("Hat", dec!(15), 1).await;

    let txn_result = {
        use sea_orm::TransactionTrait;
        let txn = app.state.db.begin().await.unwrap();
        let result = InventoryLedger::reserve_all(
            &txn,
            &[
                StockLine {
                    product_id: plenty.id,
                    quantity: 4,
                },
                StockLine {
                    product_id: scarce.id,
                    quantity: 2,
                },
            ],
        )
        .await;
        txn.rollback().await.unwrap();
        result
    };

    assert_matches!(txn_result, Err(ServiceError::InsufficientStock(_)));
    assert_eq!(app.stock_of(plenty.id).await, 10);
    assert_eq!(app.stock_of(scarce.id).await, 1);
}

#[tokio::test]
async fn reserving_unknown_product_is_not_found() {
    let app = TestApp::new().await;
    let result = InventoryLedger::reserve(&*app.state.db, Uuid::new_v4(), 1).await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn release_puts_stock_back() {
    let app = TestApp::new().await;
    let product = app.seed_product("Scarf", dec!(12), 2).await;

    InventoryLedger::reserve(&*app.state.db, product.id, 2)
        .await
        .unwrap();
    assert_eq!(app.stock_of(product.id).await, 0);
    assert_matches!(
        InventoryLedger::reserve(&*app.state.db, product.id, 1).await,
        Err(ServiceError::InsufficientStock(_))
    );

    InventoryLedger::release(&*app.state.db, product.id, 2)
        .await
        .unwrap();
    assert_eq!(app.stock_of(product.id).await, 2);
}
