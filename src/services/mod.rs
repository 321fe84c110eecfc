// Checkout core
pub mod cart;
pub mod inventory;
pub mod orders;
pub mod payments;
pub mod pricing;
pub mod reconciler;

// Customer account features
pub mod addresses;
pub mod coupons;
pub mod reviews;
pub mod wallet;
pub mod wishlist;
