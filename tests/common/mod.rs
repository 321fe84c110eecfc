#![allow(dead_code)]

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use serde_json::Value;
use storefront_api::{
    auth::{AuthConfig, AuthService, ADMIN_ROLE},
    config::AppConfig,
    db,
    entities::{
        address, cart_item, coupon, offer, product, wallet, DiscountType, Order, OrderModel,
        Product, Wallet, WalletModel,
    },
    events::{self, EventSender, Notifier},
    handlers::AppServices,
    services::reconciler::PaymentReconciler,
    services::payments::{
        CaptureStatus, CurrencyConverter, PaymentIntent, PaymentProcessor, ProcessorError,
    },
    AppState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "k9Vq2xR7mLp4Tz8Wn3Bc6Hd1Fs5Gj0Ya";

/// Processor double: hands out sequential tokens and answers captures from a script.
pub struct FakeProcessor {
    intents: AtomicUsize,
    captures: AtomicUsize,
    capture_result: Mutex<CaptureStatus>,
    pub last_intent: Mutex<Option<(Decimal, String)>>,
    racing_abandon: Mutex<Option<Arc<PaymentReconciler>>>,
    sell_out: Mutex<Option<(Arc<DatabaseConnection>, Uuid)>>,
    /// What the cancel redirect reported when it arrived mid-capture.
    pub abandon_outcome: Mutex<Option<String>>,
}

impl FakeProcessor {
    pub fn new() -> Self {
        Self {
            intents: AtomicUsize::new(0),
            captures: AtomicUsize::new(0),
            capture_result: Mutex::new(CaptureStatus::Completed),
            last_intent: Mutex::new(None),
            racing_abandon: Mutex::new(None),
            sell_out: Mutex::new(None),
            abandon_outcome: Mutex::new(None),
        }
    }

    /// Delivers the cancel redirect for the same token while the capture is in flight.
    pub fn abandon_during_capture(&self, reconciler: Arc<PaymentReconciler>) {
        *self.racing_abandon.lock().unwrap() = Some(reconciler);
    }

    /// Another shopper buys the last units while the intent is being created.
    pub fn sell_out_during_intent(&self, db: Arc<DatabaseConnection>, product_id: Uuid) {
        *self.sell_out.lock().unwrap() = Some((db, product_id));
    }

    pub fn intent_calls(&self) -> usize {
        self.intents.load(Ordering::SeqCst)
    }

    pub fn set_capture_result(&self, status: CaptureStatus) {
        *self.capture_result.lock().unwrap() = status;
    }

    pub fn capture_calls(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    async fn create_intent(
        &self,
        amount: Decimal,
        currency: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        let n = self.intents.fetch_add(1, Ordering::SeqCst) + 1;
        let sell_out = self.sell_out.lock().unwrap().take();
        if let Some((db, product_id)) = sell_out {
            product::Entity::update_many()
                .col_expr(product::Column::Quantity, Expr::value(0))
                .filter(product::Column::Id.eq(product_id))
                .exec(&*db)
                .await
                .expect("sell out product");
        }
        *self.last_intent.lock().unwrap() = Some((amount, currency.to_string()));
        let token = format!("EC-TEST{:04}", n);
        Ok(PaymentIntent {
            approval_url: format!("https://gateway.test/checkoutnow?token={}", token),
            token,
        })
    }

    async fn capture_intent(&self, token: &str) -> Result<CaptureStatus, ProcessorError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let racing = self.racing_abandon.lock().unwrap().take();
        if let Some(reconciler) = racing {
            let outcome = reconciler.abandon(token).await;
            *self.abandon_outcome.lock().unwrap() = Some(format!("{:?}", outcome));
        }
        Ok(self.capture_result.lock().unwrap().clone())
    }
}

/// Converter double applying one fixed rate, or failing when no rate is set.
pub struct FixedRateConverter {
    pub rate: Option<Decimal>,
}

#[async_trait]
impl CurrencyConverter for FixedRateConverter {
    async fn convert(
        &self,
        amount: Decimal,
        from: &str,
        to: &str,
    ) -> Result<Decimal, ProcessorError> {
        if from == to {
            return Ok(amount);
        }
        self.rate
            .map(|rate| (amount * rate).round_dp(2))
            .ok_or_else(|| ProcessorError::MissingRate {
                from: from.to_string(),
                to: to.to_string(),
            })
    }
}

/// Application harness on a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub processor: Arc<FakeProcessor>,
    pub user_id: Uuid,
    token: String,
    auth_service: Arc<AuthService>,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_rate(Some(Decimal::ONE)).await
    }

    /// Builds the app with the INR to USD rate the converter should apply.
    pub async fn with_rate(rate: Option<Decimal>) -> Self {
        Self::with_options(rate, 1).await
    }

    /// Builds the app on a pool of `connections` so transactions really overlap.
    pub async fn with_pool_size(connections: u32) -> Self {
        Self::with_options(Some(Decimal::ONE), connections).await
    }

    pub async fn with_options(rate: Option<Decimal>, connections: u32) -> Self {
        let db_dir = tempfile::tempdir().expect("create temp dir");
        let db_path = db_dir.path().join("storefront_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            TEST_JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = connections;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(events::LogNotifier)];
        let event_task = tokio::spawn(events::process_events(event_rx, notifiers));

        let processor = Arc::new(FakeProcessor::new());
        let converter = Arc::new(FixedRateConverter { rate });
        let services = AppServices::new(
            db_arc.clone(),
            event_sender.clone(),
            processor.clone(),
            converter,
            &cfg,
        );

        let auth_service = Arc::new(AuthService::new(AuthConfig::from_app_config(&cfg)));
        let user_id = Uuid::new_v4();
        let token = auth_service
            .issue_token(
                user_id,
                Some("Test Shopper".to_string()),
                Some("shopper@example.com".to_string()),
                vec!["customer".to_string()],
            )
            .expect("issue test token");

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
            auth: auth_service.clone(),
        };
        let router = storefront_api::app_router(state.clone());

        Self {
            router,
            state,
            processor,
            user_id,
            token,
            auth_service,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// A bearer token for a fresh user carrying the admin role.
    pub fn admin_token(&self) -> String {
        self.auth_service
            .issue_token(Uuid::new_v4(), None, None, vec![ADMIN_ROLE.to_string()])
            .expect("issue admin token")
    }

    /// A bearer token for another shopper.
    pub fn token_for(&self, user_id: Uuid) -> String {
        self.auth_service
            .issue_token(user_id, None, None, vec!["customer".to_string()])
            .expect("issue token")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Convenience helper for requests as the default shopper.
    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(self.token())).await
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, quantity: i32) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            quantity: Set(quantity),
            deleted_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_offer(&self, product_id: Uuid, percentage: i32) {
        offer::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            percentage: Set(percentage),
            deleted_at: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed offer");
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        discount_type: DiscountType,
        value: Decimal,
    ) -> coupon::Model {
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            discount_type: Set(discount_type),
            discount_value: Set(value),
            description: Set(None),
            min_purchase_amount: Set(Decimal::ZERO),
            max_purchase_amount: Set(Decimal::ZERO),
            starts_at: Set(None),
            ends_at: Set(None),
            is_active: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed coupon")
    }

    pub async fn seed_address(&self, user_id: Uuid) -> address::Model {
        address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            name: Set("Test Shopper".to_string()),
            line1: Set("1 Market Street".to_string()),
            line2: Set(None),
            city: Set("Pune".to_string()),
            state: Set("MH".to_string()),
            postal_code: Set("411001".to_string()),
            country: Set("India".to_string()),
            phone: Set("+910000000000".to_string()),
            deleted_at: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed address")
    }

    pub async fn seed_cart_line(&self, user_id: Uuid, product: &product::Model, quantity: i32) {
        let now = Utc::now();
        cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            product_id: Set(product.id),
            quantity: Set(quantity),
            line_total: Set(product.price * Decimal::from(quantity)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed cart line");
    }

    pub async fn seed_wallet(&self, user_id: Uuid, balance: Decimal) {
        let now = Utc::now();
        wallet::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            balance: Set(balance),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed wallet");
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        Product::find_by_id(product_id)
            .one(&*self.state.db)
            .await
            .expect("query product")
            .expect("product exists")
            .quantity
    }

    pub async fn wallet_of(&self, user_id: Uuid) -> Option<WalletModel> {
        Wallet::find()
            .filter(wallet::Column::UserId.eq(user_id))
            .one(&*self.state.db)
            .await
            .expect("query wallet")
    }

    pub async fn orders(&self) -> Vec<OrderModel> {
        Order::find()
            .all(&*self.state.db)
            .await
            .expect("query orders")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&body).expect("response body is json")
}

/// Decimals serialize as strings; accept numbers too.
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        Value::Number(n) => Decimal::from_str(&n.to_string()).expect("decimal number"),
        other => panic!("not a decimal: {other}"),
    }
}
