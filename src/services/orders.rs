use crate::{
    config::{GatewayConfig, PricingConfig},
    db::DbPool,
    entities::{
        address::{self, Entity as AddressEntity},
        order::{
            self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
            OrderStatus, PaymentMethod, PaymentStatus,
        },
        order_item::{self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity},
        pending_payment::{ActiveModel as PendingPaymentActiveModel, PendingPaymentStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cart::CartService,
        inventory::{InventoryLedger, StockLine},
        payments::{CurrencyConverter, PaymentProcessor},
        pricing::{round2, OrderDraft, PricedLine, PricingService},
        wallet::WalletService,
    },
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PlaceOrderRequest {
    pub address_id: Uuid,
    #[validate(length(max = 64, message = "Coupon code is too long"))]
    pub coupon_code: Option<String>,
    #[validate(length(min = 1, message = "Payment method is required"))]
    pub method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSummary {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub address_id: Uuid,
    pub total: Decimal,
    pub discount: Decimal,
    pub coupon_discount: Decimal,
    pub quantity: i32,
    pub status: OrderStatus,
    pub method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub payment_id: Option<String>,
    pub return_reason: Option<String>,
    pub order_date: DateTime<Utc>,
}

impl From<OrderModel> for OrderSummary {
    fn from(order: OrderModel) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number,
            user_id: order.user_id,
            address_id: order.address_id,
            total: order.total,
            discount: order.discount,
            coupon_discount: order.coupon_discount,
            quantity: order.quantity,
            status: order.status,
            method: order.method,
            payment_status: order.payment_status,
            payment_id: order.payment_id,
            return_reason: order.return_reason,
            order_date: order.order_date,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: OrderSummary,
    pub items: Vec<order_item::Model>,
}

/// Result of a placement request. Gateway payments finish later in the callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlaceOrderOutcome {
    Placed(OrderSummary),
    AwaitingPayment { approval_url: String, token: String },
}

/// Everything the commit step needs besides the priced lines.
#[derive(Debug, Clone)]
pub struct OrderHeader {
    pub user_id: Uuid,
    pub address_id: Uuid,
    pub method: PaymentMethod,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_id: Option<String>,
}

/// Order placement, history and post-placement transitions.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    processor: Arc<dyn PaymentProcessor>,
    converter: Arc<dyn CurrencyConverter>,
    pricing: PricingConfig,
    gateway: GatewayConfig,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        processor: Arc<dyn PaymentProcessor>,
        converter: Arc<dyn CurrencyConverter>,
        pricing: PricingConfig,
        gateway: GatewayConfig,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            processor,
            converter,
            pricing,
            gateway,
        }
    }

    /// Prices the user's cart and settles it with the requested payment method.
    #[instrument(skip(self, request), fields(user_id = %user_id, method = %request.method))]
    pub async fn place_order(
        &self,
        user_id: Uuid,
        request: PlaceOrderRequest,
    ) -> Result<PlaceOrderOutcome, ServiceError> {
        request.validate()?;
        let method = parse_method(&request.method)?;
        let db = &*self.db_pool;

        AddressEntity::find_by_id(request.address_id)
            .filter(address::Column::UserId.eq(user_id))
            .filter(address::Column::DeletedAt.is_null())
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Address not found".to_string()))?;

        let draft =
            PricingService::price_cart(db, user_id, request.coupon_code.as_deref()).await?;

        let outcome = match method {
            PaymentMethod::Cod => {
                if draft.total_amount > self.pricing.cod_limit {
                    warn!(total = %draft.total_amount, limit = %self.pricing.cod_limit, "cod limit exceeded");
                    return Err(ServiceError::LimitExceeded(format!(
                        "Cash on delivery is not available for orders above {}",
                        self.pricing.cod_limit
                    )));
                }
                let header = OrderHeader {
                    user_id,
                    address_id: request.address_id,
                    method,
                    status: OrderStatus::Pending,
                    payment_status: PaymentStatus::Pending,
                    payment_id: None,
                };
                PlaceOrderOutcome::Placed(self.commit_order(header, &draft).await?.into())
            }
            PaymentMethod::Wallet => {
                let header = OrderHeader {
                    user_id,
                    address_id: request.address_id,
                    method,
                    status: OrderStatus::Pending,
                    payment_status: PaymentStatus::Success,
                    payment_id: None,
                };
                PlaceOrderOutcome::Placed(self.commit_order(header, &draft).await?.into())
            }
            PaymentMethod::Gateway => {
                self.start_gateway_payment(user_id, request.address_id, &draft)
                    .await?
            }
        };

        metrics::counter!("storefront_orders_placed_total", 1, "method" => method.to_string());
        Ok(outcome)
    }

    /// Reserves stock, debits the wallet when needed, writes the order and empties the cart,
    /// all in one transaction.
    #[instrument(skip(self, header, draft), fields(user_id = %header.user_id, method = %header.method))]
    pub async fn commit_order(
        &self,
        header: OrderHeader,
        draft: &OrderDraft,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start order transaction");
            ServiceError::DatabaseError(e)
        })?;

        InventoryLedger::reserve_all(&txn, &draft.stock_lines()).await?;

        let order_id = Uuid::new_v4();
        let order_number = generate_order_number();
        if header.method == PaymentMethod::Wallet {
            WalletService::debit(
                &txn,
                header.user_id,
                draft.total_amount,
                Some(order_id),
                format!("Payment for order {}", order_number),
            )
            .await?;
        }

        let order = Self::insert_order(&txn, order_id, order_number, &header, draft).await?;
        CartService::clear_lines(&txn, header.user_id, None).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order.id, "Failed to commit order transaction");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order.id, order_number = %order.order_number, total = %order.total, "Order placed");

        if header.method == PaymentMethod::Wallet {
            self.event_sender
                .send_or_log(Event::WalletDebited {
                    user_id: header.user_id,
                    amount: order.total,
                    order_id: Some(order.id),
                })
                .await;
        }
        self.event_sender
            .send_or_log(Event::OrderPlaced {
                order_id: order.id,
                user_id: order.user_id,
                order_number: order.order_number.clone(),
                total: order.total,
                method: order.method.to_string(),
            })
            .await;

        Ok(order)
    }

    /// Writes the order header and one item per priced line.
    pub async fn insert_order<C>(
        conn: &C,
        order_id: Uuid,
        order_number: String,
        header: &OrderHeader,
        draft: &OrderDraft,
    ) -> Result<OrderModel, ServiceError>
    where
        C: ConnectionTrait,
    {
        let now = Utc::now();
        let order = OrderActiveModel {
            id: Set(order_id),
            order_number: Set(order_number),
            user_id: Set(header.user_id),
            address_id: Set(header.address_id),
            payment_id: Set(header.payment_id.clone()),
            coupon_id: Set(draft.coupon_id),
            total: Set(draft.total_amount),
            discount: Set(draft.total_discount),
            coupon_discount: Set(draft.coupon_discount),
            quantity: Set(draft.total_quantity),
            status: Set(header.status),
            payment_status: Set(header.payment_status),
            method: Set(header.method),
            return_reason: Set(None),
            order_date: Set(now),
            updated_at: Set(now),
            version: Set(1),
        }
        .insert(conn)
        .await?;

        for line in &draft.lines {
            OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price()),
                discount: Set(line.discount),
                price: Set(line.price),
            }
            .insert(conn)
            .await?;
        }

        Ok(order)
    }

    async fn start_gateway_payment(
        &self,
        user_id: Uuid,
        address_id: Uuid,
        draft: &OrderDraft,
    ) -> Result<PlaceOrderOutcome, ServiceError> {
        let settlement_amount = round2(
            self.converter
                .convert(
                    draft.total_amount,
                    &self.pricing.store_currency,
                    &self.gateway.settlement_currency,
                )
                .await
                .map_err(|e| {
                    error!(error = %e, "currency conversion failed");
                    ServiceError::from(e)
                })?,
        );

        let intent = self
            .processor
            .create_intent(settlement_amount, &self.gateway.settlement_currency)
            .await
            .map_err(|e| {
                error!(error = %e, "payment intent creation failed");
                ServiceError::from(e)
            })?;

        let items = serde_json::to_value(&draft.lines)
            .map_err(|e| ServiceError::InternalError(format!("snapshot encoding: {}", e)))?;

        let recorded = async {
            let txn = self.db_pool.begin().await?;
            InventoryLedger::reserve_all(&txn, &draft.stock_lines()).await?;

            let now = Utc::now();
            PendingPaymentActiveModel {
                token: Set(intent.token.clone()),
                user_id: Set(user_id),
                address_id: Set(address_id),
                coupon_id: Set(draft.coupon_id),
                total: Set(draft.total_amount),
                discount: Set(draft.total_discount),
                coupon_discount: Set(draft.coupon_discount),
                quantity: Set(draft.total_quantity),
                settlement_amount: Set(settlement_amount),
                settlement_currency: Set(self.gateway.settlement_currency.clone()),
                status: Set(PendingPaymentStatus::Pending),
                payment_status: Set(PaymentStatus::Pending),
                items: Set(items),
                order_id: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;

            txn.commit().await?;
            Ok::<_, ServiceError>(())
        }
        .await;

        // Nothing is charged yet; the unused intent expires at the processor.
        if let Err(e) = recorded {
            warn!(
                token = %intent.token,
                amount = %settlement_amount,
                currency = %self.gateway.settlement_currency,
                user_id = %user_id,
                error = %e,
                "payment intent created but checkout not recorded; intent left unused"
            );
            metrics::counter!("storefront_payment_intents_orphaned_total", 1);
            return Err(e);
        }

        info!(token = %intent.token, amount = %settlement_amount, "awaiting gateway approval");
        self.event_sender
            .send_or_log(Event::PaymentIntentCreated {
                token: intent.token.clone(),
                user_id,
                settlement_amount,
                settlement_currency: self.gateway.settlement_currency.clone(),
            })
            .await;

        Ok(PlaceOrderOutcome::AwaitingPayment {
            approval_url: intent.approval_url,
            token: intent.token,
        })
    }

    /// Customer cancellation of an open order, with stock release and prepaid refund.
    #[instrument(skip(self), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderSummary, ServiceError> {
        let order = self.find_owned(user_id, order_id).await?;
        if !order.status.is_cancellable() {
            return Err(ServiceError::Conflict(format!(
                "Order in status {} cannot be canceled",
                order.status
            )));
        }

        let txn = self.db_pool.begin().await?;
        let refunded = Self::apply_cancellation(&txn, &order).await?;
        txn.commit().await?;

        self.after_cancellation(&order, refunded).await;
        Ok(self.reload(order_id).await?.into())
    }

    /// Marks a delivered order returned and puts its items back in stock.
    #[instrument(skip(self, reason), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn return_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        reason: &str,
    ) -> Result<OrderSummary, ServiceError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ServiceError::ValidationError(
                "A return reason is required".to_string(),
            ));
        }

        let order = self.find_owned(user_id, order_id).await?;
        if order.status != OrderStatus::Delivered {
            return Err(ServiceError::Conflict(format!(
                "Only delivered orders can be returned, order is {}",
                order.status
            )));
        }

        let txn = self.db_pool.begin().await?;
        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Returned))
            .col_expr(order::Column::ReturnReason, Expr::value(reason.to_string()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Version.eq(order.version))
            .filter(order::Column::Status.eq(OrderStatus::Delivered))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(order.id));
        }

        let lines = Self::stock_lines_of(&txn, &order).await?;
        InventoryLedger::release_all(&txn, &lines).await?;
        txn.commit().await?;

        info!("Order returned");
        self.event_sender
            .send_or_log(Event::OrderReturned {
                order_id,
                user_id,
                reason: reason.to_string(),
            })
            .await;

        Ok(self.reload(order_id).await?.into())
    }

    /// The user's orders, newest first, with their items.
    #[instrument(skip(self))]
    pub async fn list_orders(&self, user_id: Uuid) -> Result<Vec<OrderDetail>, ServiceError> {
        let rows = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::OrderDate)
            .find_with_related(OrderItemEntity)
            .all(&*self.db_pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(order, items)| OrderDetail {
                order: order.into(),
                items,
            })
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, user_id: Uuid, order_id: Uuid) -> Result<OrderDetail, ServiceError> {
        let order = self.find_owned(user_id, order_id).await?;
        let items = order
            .find_related(OrderItemEntity)
            .all(&*self.db_pool)
            .await?;
        Ok(OrderDetail {
            order: order.into(),
            items,
        })
    }

    /// Administrative fulfilment transition.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderSummary, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        if !order.status.can_transition_to(new_status) {
            return Err(ServiceError::Conflict(format!(
                "Cannot move order from {} to {}",
                order.status, new_status
            )));
        }

        if new_status == OrderStatus::Canceled {
            let txn = self.db_pool.begin().await?;
            let refunded = Self::apply_cancellation(&txn, &order).await?;
            txn.commit().await?;
            self.after_cancellation(&order, refunded).await;
        } else {
            let payment_status =
                if new_status == OrderStatus::Delivered && order.method == PaymentMethod::Cod {
                    PaymentStatus::Success
                } else {
                    order.payment_status
                };

            let result = OrderEntity::update_many()
                .col_expr(order::Column::Status, Expr::value(new_status))
                .col_expr(order::Column::PaymentStatus, Expr::value(payment_status))
                .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
                .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1))
                .filter(order::Column::Id.eq(order.id))
                .filter(order::Column::Version.eq(order.version))
                .exec(&*self.db_pool)
                .await?;
            if result.rows_affected == 0 {
                return Err(ServiceError::ConcurrentModification(order.id));
            }
        }

        info!(old_status = %order.status, "Order status updated");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: order.status.to_string(),
                new_status: new_status.to_string(),
            })
            .await;

        Ok(self.reload(order_id).await?.into())
    }

    /// Cancels `order` inside the caller's transaction. Returns the refunded amount, if any.
    async fn apply_cancellation<C>(
        conn: &C,
        order: &OrderModel,
    ) -> Result<Option<Decimal>, ServiceError>
    where
        C: ConnectionTrait,
    {
        let payment_status = if order.method == PaymentMethod::Cod {
            PaymentStatus::Failed
        } else {
            order.payment_status
        };

        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Canceled))
            .col_expr(order::Column::PaymentStatus, Expr::value(payment_status))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Version.eq(order.version))
            .filter(order::Column::Status.is_in([OrderStatus::Pending, OrderStatus::Processing]))
            .exec(conn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(order.id));
        }

        let lines = Self::stock_lines_of(conn, order).await?;
        InventoryLedger::release_all(conn, &lines).await?;

        if order.method.is_prepaid() {
            WalletService::credit(
                conn,
                order.user_id,
                order.total,
                Some(order.id),
                format!("Refund for order {}", order.order_number),
            )
            .await?;
            return Ok(Some(order.total));
        }
        Ok(None)
    }

    async fn after_cancellation(&self, order: &OrderModel, refunded: Option<Decimal>) {
        info!(order_id = %order.id, refunded = ?refunded, "Order canceled");
        metrics::counter!("storefront_orders_canceled_total", 1);

        if let Some(amount) = refunded {
            self.event_sender
                .send_or_log(Event::WalletCredited {
                    user_id: order.user_id,
                    amount,
                    order_id: Some(order.id),
                })
                .await;
        }
        self.event_sender
            .send_or_log(Event::OrderCanceled {
                order_id: order.id,
                user_id: order.user_id,
                refunded,
            })
            .await;
    }

    async fn stock_lines_of<C>(conn: &C, order: &OrderModel) -> Result<Vec<StockLine>, ServiceError>
    where
        C: ConnectionTrait,
    {
        Ok(OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(conn)
            .await?
            .into_iter()
            .map(|item| StockLine {
                product_id: item.product_id,
                quantity: item.quantity,
            })
            .collect())
    }

    async fn find_owned(&self, user_id: Uuid, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .filter(order::Column::UserId.eq(user_id))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))
    }

    async fn reload(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))
    }
}

/// Parses the request's payment method; unknown names are a validation error.
pub fn parse_method(raw: &str) -> Result<PaymentMethod, ServiceError> {
    raw.trim()
        .parse::<PaymentMethod>()
        .map_err(|_| ServiceError::ValidationError("Invalid payment method".to_string()))
}

/// `ORD-` followed by eight upper-case hex digits.
pub fn generate_order_number() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("ORD-{}", id[..8].to_ascii_uppercase())
}

/// Rebuilds priced lines from a pending payment's stored snapshot.
pub fn decode_snapshot(items: &serde_json::Value) -> Result<Vec<PricedLine>, ServiceError> {
    serde_json::from_value(items.clone())
        .map_err(|e| ServiceError::InternalError(format!("pending payment snapshot: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn order_numbers_have_fixed_shape() {
        let number = generate_order_number();
        assert_eq!(number.len(), 12);
        assert!(number.starts_with("ORD-"));
        assert!(number[4..]
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn payment_method_parsing() {
        assert_eq!(parse_method("COD").unwrap(), PaymentMethod::Cod);
        assert_eq!(parse_method("Wallet").unwrap(), PaymentMethod::Wallet);
        assert_eq!(parse_method("Paypal").unwrap(), PaymentMethod::Gateway);
        assert_matches!(
            parse_method("Barter"),
            Err(ServiceError::ValidationError(msg)) if msg == "Invalid payment method"
        );
    }
}
