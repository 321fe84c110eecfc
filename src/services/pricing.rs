//! Cart pricing: per-product offers first, then an optional coupon on the
//! offer-discounted subtotal.

use crate::{
    entities::{
        coupon::{self, DiscountType, Entity as CouponEntity},
        offer::{self, Entity as OfferEntity},
    },
    errors::ServiceError,
    services::cart::{CartLine, CartService},
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::inventory::StockLine;

/// One cart line after offer pricing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    /// Catalog price of one unit.
    pub list_price: Decimal,
    /// Offer discount on the whole line.
    pub discount: Decimal,
    /// Line price after the offer discount.
    pub price: Decimal,
}

impl PricedLine {
    /// Unit price after the offer discount.
    pub fn unit_price(&self) -> Decimal {
        if self.quantity == 0 {
            return Decimal::ZERO;
        }
        round2(self.price / Decimal::from(self.quantity))
    }

    pub fn stock_line(&self) -> StockLine {
        StockLine {
            product_id: self.product_id,
            quantity: self.quantity,
        }
    }
}

/// A fully priced cart, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub lines: Vec<PricedLine>,
    pub total_amount: Decimal,
    pub total_discount: Decimal,
    pub total_quantity: i32,
    pub coupon_id: Option<Uuid>,
    pub coupon_discount: Decimal,
}

impl OrderDraft {
    pub fn stock_lines(&self) -> Vec<StockLine> {
        self.lines.iter().map(PricedLine::stock_line).collect()
    }

    pub fn product_ids(&self) -> Vec<Uuid> {
        self.lines.iter().map(|l| l.product_id).collect()
    }
}

pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Prices cart lines against the active offer percentages keyed by product id.
///
/// Fails with `InsufficientStock` when a line asks for more than is on hand. The
/// authoritative check happens again when stock is reserved.
pub fn price_lines(
    lines: &[CartLine],
    offers: &HashMap<Uuid, i32>,
) -> Result<OrderDraft, ServiceError> {
    if lines.is_empty() {
        return Err(ServiceError::EmptyCart);
    }

    let mut priced = Vec::with_capacity(lines.len());
    let mut total_amount = Decimal::ZERO;
    let mut total_discount = Decimal::ZERO;
    let mut total_quantity = 0i32;

    for line in lines {
        if line.product.quantity < line.quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} of {} left in stock",
                line.product.quantity, line.product.name
            )));
        }

        let gross = line.product.price * Decimal::from(line.quantity);
        let discount = match offers.get(&line.product.id) {
            Some(pct) => round2(Decimal::from(*pct) / dec!(100) * gross),
            None => Decimal::ZERO,
        };
        let price = round2(gross - discount);

        total_amount += price;
        total_discount += discount;
        total_quantity += line.quantity;

        priced.push(PricedLine {
            product_id: line.product.id,
            name: line.product.name.clone(),
            quantity: line.quantity,
            list_price: line.product.price,
            discount,
            price,
        });
    }

    Ok(OrderDraft {
        lines: priced,
        total_amount: round2(total_amount),
        total_discount: round2(total_discount),
        total_quantity,
        coupon_id: None,
        coupon_discount: Decimal::ZERO,
    })
}

/// Applies a coupon to the offer-discounted total.
pub fn apply_coupon(
    draft: &mut OrderDraft,
    coupon: &coupon::Model,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    if !coupon.is_active || !coupon.is_within_window(now) {
        return Err(ServiceError::InvalidCoupon(format!(
            "Coupon {} is not valid at this time",
            coupon.code
        )));
    }

    if draft.total_amount < coupon.min_purchase_amount {
        return Err(ServiceError::CouponThresholdNotMet(format!(
            "Coupon {} requires a minimum purchase of {}",
            coupon.code, coupon.min_purchase_amount
        )));
    }

    if coupon.max_purchase_amount > Decimal::ZERO && draft.total_amount > coupon.max_purchase_amount
    {
        return Err(ServiceError::CouponThresholdNotMet(format!(
            "Coupon {} applies to purchases up to {}",
            coupon.code, coupon.max_purchase_amount
        )));
    }

    let raw = match coupon.discount_type {
        DiscountType::Percentage => coupon.discount_value / dec!(100) * draft.total_amount,
        DiscountType::Fixed => coupon.discount_value,
    };
    let discount = round2(raw.max(Decimal::ZERO).min(draft.total_amount));

    draft.coupon_id = Some(coupon.id);
    draft.coupon_discount = discount;
    draft.total_amount = round2(draft.total_amount - discount);
    draft.total_discount = round2(draft.total_discount + discount);
    Ok(())
}

/// Loads everything a cart needs to be priced.
pub struct PricingService;

impl PricingService {
    /// Snapshot the user's cart and price it, including the optional coupon code.
    #[instrument(skip(conn), fields(user_id = %user_id))]
    pub async fn price_cart<C>(
        conn: &C,
        user_id: Uuid,
        coupon_code: Option<&str>,
    ) -> Result<OrderDraft, ServiceError>
    where
        C: ConnectionTrait,
    {
        let lines = CartService::snapshot(conn, user_id).await?;
        let product_ids: Vec<Uuid> = lines.iter().map(|l| l.product.id).collect();

        let offers: HashMap<Uuid, i32> = OfferEntity::find()
            .filter(offer::Column::ProductId.is_in(product_ids))
            .filter(offer::Column::DeletedAt.is_null())
            .all(conn)
            .await?
            .into_iter()
            .map(|o| (o.product_id, o.percentage.clamp(0, 100)))
            .collect();

        let mut draft = price_lines(&lines, &offers)?;

        if let Some(code) = coupon_code.map(str::trim).filter(|c| !c.is_empty()) {
            let coupon = CouponEntity::find()
                .filter(coupon::Column::Code.eq(code))
                .filter(coupon::Column::IsActive.eq(true))
                .one(conn)
                .await?
                .ok_or_else(|| {
                    warn!(coupon_code = %code, "unknown or inactive coupon");
                    ServiceError::InvalidCoupon(format!("Coupon {} does not exist", code))
                })?;
            apply_coupon(&mut draft, &coupon, Utc::now())?;
        }

        debug!(
            total = %draft.total_amount,
            discount = %draft.total_discount,
            quantity = draft.total_quantity,
            "cart priced"
        );
        Ok(draft)
    }
}
