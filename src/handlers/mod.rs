pub mod addresses;
pub mod admin;
pub mod cart;
pub mod common;
pub mod coupons;
pub mod orders;
pub mod payments;
pub mod reviews;
pub mod wallet;
pub mod wishlist;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    addresses::AddressService,
    cart::CartService,
    coupons::CouponService,
    orders::OrderService,
    payments::{CurrencyConverter, PaymentProcessor},
    reconciler::PaymentReconciler,
    reviews::ReviewService,
    wallet::WalletService,
    wishlist::WishlistService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub reconciler: Arc<PaymentReconciler>,
    pub cart: Arc<CartService>,
    pub wallet: Arc<WalletService>,
    pub wishlist: Arc<WishlistService>,
    pub addresses: Arc<AddressService>,
    pub coupons: Arc<CouponService>,
    pub reviews: Arc<ReviewService>,
}

impl AppServices {
    /// Wires every service against one pool, one event channel and the payment collaborators.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        processor: Arc<dyn PaymentProcessor>,
        converter: Arc<dyn CurrencyConverter>,
        config: &AppConfig,
    ) -> Self {
        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            event_sender.clone(),
            processor.clone(),
            converter,
            config.pricing.clone(),
            config.gateway.clone(),
        ));
        let reconciler = Arc::new(PaymentReconciler::new(
            db_pool.clone(),
            processor,
            event_sender,
            config.gateway.capture_timeout(),
        ));

        Self {
            orders,
            reconciler,
            cart: Arc::new(CartService::new(
                db_pool.clone(),
                config.pricing.max_line_quantity,
            )),
            wallet: Arc::new(WalletService::new(db_pool.clone())),
            wishlist: Arc::new(WishlistService::new(db_pool.clone())),
            addresses: Arc::new(AddressService::new(db_pool.clone())),
            reviews: Arc::new(ReviewService::new(db_pool.clone())),
            coupons: Arc::new(CouponService::new(db_pool)),
        }
    }
}
