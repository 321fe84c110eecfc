//! sea-orm entities backing the storefront.

pub mod address;
pub mod cart_item;
pub mod coupon;
pub mod offer;
pub mod order;
pub mod order_item;
pub mod pending_payment;
pub mod product;
pub mod review;
pub mod wallet;
pub mod wallet_transaction;
pub mod wishlist_item;

pub use address::{Entity as Address, Model as AddressModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use coupon::{DiscountType, Entity as Coupon, Model as CouponModel};
pub use offer::{Entity as Offer, Model as OfferModel};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus, PaymentMethod, PaymentStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use pending_payment::{
    Entity as PendingPayment, Model as PendingPaymentModel, PendingPaymentStatus,
};
pub use product::{Entity as Product, Model as ProductModel};
pub use review::{Entity as Review, Model as ReviewModel};
pub use wallet::{Entity as Wallet, Model as WalletModel};
pub use wallet_transaction::{
    Entity as WalletTransaction, Model as WalletTransactionModel, TransactionType,
};
pub use wishlist_item::{Entity as WishlistItem, Model as WishlistItemModel};
