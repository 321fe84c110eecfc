//! Settles gateway payments once the customer comes back from the processor.

use crate::{
    db::DbPool,
    entities::{
        order::{Model as OrderModel, OrderStatus, PaymentMethod, PaymentStatus},
        pending_payment::{
            self, Entity as PendingPaymentEntity, Model as PendingPaymentModel,
            PendingPaymentStatus,
        },
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cart::CartService,
        inventory::{InventoryLedger, StockLine},
        orders::{decode_snapshot, generate_order_number, OrderHeader, OrderService},
        payments::{CaptureStatus, PaymentProcessor},
        pricing::OrderDraft,
    },
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, TransactionTrait,
};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct PaymentReconciler {
    db_pool: Arc<DbPool>,
    processor: Arc<dyn PaymentProcessor>,
    event_sender: Arc<EventSender>,
    capture_timeout: Duration,
}

impl PaymentReconciler {
    pub fn new(
        db_pool: Arc<DbPool>,
        processor: Arc<dyn PaymentProcessor>,
        event_sender: Arc<EventSender>,
        capture_timeout: Duration,
    ) -> Self {
        Self {
            db_pool,
            processor,
            event_sender,
            capture_timeout,
        }
    }

    /// Captures the payment behind `token` and promotes its pending row to an order.
    ///
    /// Unknown, already settled and abandoned tokens all report `PendingPaymentNotFound`
    /// before the processor is contacted.
    #[instrument(skip(self, payer_id), fields(token = %token))]
    pub async fn capture(
        &self,
        token: &str,
        payer_id: Option<&str>,
    ) -> Result<OrderModel, ServiceError> {
        let pending = self.find_pending(token).await?;
        let lines = decode_snapshot(&pending.items)?;

        // Claim the row so the cancel redirect and the sweep leave it alone while the
        // processor is capturing.
        let claimed = transition(
            &*self.db_pool,
            token,
            PendingPaymentStatus::Pending,
            PendingPaymentStatus::Capturing,
        )
        .await?;
        if !claimed {
            return Err(ServiceError::PendingPaymentNotFound(token.to_string()));
        }

        let status = match tokio::time::timeout(
            self.capture_timeout,
            self.processor.capture_intent(token),
        )
        .await
        {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                error!(error = %e, "capture call failed");
                self.release_claim(token).await;
                return Err(ServiceError::from(e));
            }
            Err(_) => {
                error!("capture timed out");
                self.release_claim(token).await;
                return Err(ServiceError::ExternalServiceError(
                    "Payment capture timed out".to_string(),
                ));
            }
        };

        if let CaptureStatus::Other(reported) = status {
            warn!(%reported, payer_id = ?payer_id, "capture not completed");
            metrics::counter!("storefront_payment_captures_total", 1, "outcome" => "failed");
            self.release_claim(token).await;
            return Err(ServiceError::CaptureFailed(format!(
                "Processor reported {}",
                reported
            )));
        }

        let draft = OrderDraft {
            total_amount: pending.total,
            total_discount: pending.discount,
            total_quantity: pending.quantity,
            coupon_id: pending.coupon_id,
            coupon_discount: pending.coupon_discount,
            lines,
        };
        let header = OrderHeader {
            user_id: pending.user_id,
            address_id: pending.address_id,
            method: PaymentMethod::Gateway,
            status: OrderStatus::Processing,
            payment_status: PaymentStatus::Success,
            payment_id: Some(token.to_string()),
        };

        let order = match self.settle(token, &pending, &header, &draft).await {
            Ok(order) => order,
            Err(e) => {
                error!(
                    %token,
                    amount = %pending.settlement_amount,
                    currency = %pending.settlement_currency,
                    user_id = %pending.user_id,
                    error = %e,
                    "payment captured but order not recorded; refund required"
                );
                metrics::counter!("storefront_payment_captures_total", 1, "outcome" => "unrecorded");
                return Err(e);
            }
        };

        info!(order_id = %order.id, order_number = %order.order_number, "gateway payment settled");
        metrics::counter!("storefront_payment_captures_total", 1, "outcome" => "completed");

        self.event_sender
            .send_or_log(Event::PaymentCaptured {
                token: token.to_string(),
                order_id: order.id,
            })
            .await;
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

    /// Promotes a claimed row to an order in one transaction.
    async fn settle(
        &self,
        token: &str,
        pending: &PendingPaymentModel,
        header: &OrderHeader,
        draft: &OrderDraft,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db_pool.begin().await?;

        let promoted = transition(
            &txn,
            token,
            PendingPaymentStatus::Capturing,
            PendingPaymentStatus::Completed,
        )
        .await?;
        if !promoted {
            return Err(ServiceError::PendingPaymentNotFound(token.to_string()));
        }

        let order_id = Uuid::new_v4();
        let order =
            OrderService::insert_order(&txn, order_id, generate_order_number(), header, draft)
                .await?;
        CartService::clear_lines(&txn, pending.user_id, Some(draft.product_ids())).await?;

        PendingPaymentEntity::update_many()
            .col_expr(pending_payment::Column::OrderId, Expr::value(Some(order_id)))
            .col_expr(
                pending_payment::Column::PaymentStatus,
                Expr::value(PaymentStatus::Success),
            )
            .filter(pending_payment::Column::Token.eq(token))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(order)
    }

    /// Hands a claimed row back to `Pending` after a capture that did not complete.
    async fn release_claim(&self, token: &str) {
        let released = transition(
            &*self.db_pool,
            token,
            PendingPaymentStatus::Capturing,
            PendingPaymentStatus::Pending,
        )
        .await;
        match released {
            Ok(true) => {}
            Ok(false) => warn!(%token, "claimed pending payment changed state during capture"),
            Err(e) => error!(%token, error = %e, "failed to release pending payment claim"),
        }
    }

    /// Customer backed out at the processor; give the reserved stock back.
    #[instrument(skip(self), fields(token = %token))]
    pub async fn abandon(&self, token: &str) -> Result<(), ServiceError> {
        let pending = self.find_pending(token).await?;
        self.abandon_pending(&pending).await
    }

    /// Abandons every pending payment older than `max_age`. Returns how many were released.
    #[instrument(skip(self))]
    pub async fn expire_stale(&self, max_age: Duration) -> Result<u64, ServiceError> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| ServiceError::InvalidInput(format!("max_age: {}", e)))?;
        let cutoff = Utc::now() - max_age;

        let stale = PendingPaymentEntity::find()
            .filter(pending_payment::Column::Status.eq(PendingPaymentStatus::Pending))
            .filter(pending_payment::Column::CreatedAt.lt(cutoff))
            .all(&*self.db_pool)
            .await?;

        let mut expired = 0;
        for pending in stale {
            match self.abandon_pending(&pending).await {
                Ok(()) => expired += 1,
                Err(ServiceError::PendingPaymentNotFound(_)) => {}
                Err(e) => warn!(token = %pending.token, error = %e, "failed to expire pending payment"),
            }
        }

        if expired > 0 {
            info!(expired, "stale pending payments released");
        }
        Ok(expired)
    }

    async fn abandon_pending(&self, pending: &PendingPaymentModel) -> Result<(), ServiceError> {
        let lines: Vec<StockLine> = decode_snapshot(&pending.items)?
            .iter()
            .map(|l| l.stock_line())
            .collect();

        let txn = self.db_pool.begin().await?;
        let abandoned = transition(
            &txn,
            &pending.token,
            PendingPaymentStatus::Pending,
            PendingPaymentStatus::Abandoned,
        )
        .await?;
        if !abandoned {
            return Err(ServiceError::PendingPaymentNotFound(pending.token.clone()));
        }
        InventoryLedger::release_all(&txn, &lines).await?;
        txn.commit().await?;

        info!(token = %pending.token, "pending payment abandoned");
        self.event_sender
            .send_or_log(Event::PendingPaymentAbandoned {
                token: pending.token.clone(),
                user_id: pending.user_id,
            })
            .await;
        Ok(())
    }

    async fn find_pending(&self, token: &str) -> Result<PendingPaymentModel, ServiceError> {
        PendingPaymentEntity::find_by_id(token.to_string())
            .filter(pending_payment::Column::Status.eq(PendingPaymentStatus::Pending))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| {
                warn!(%token, "no pending payment for token");
                ServiceError::PendingPaymentNotFound(token.to_string())
            })
    }
}

/// Moves a pending row from `from` to `to`. False when it was no longer in `from`.
async fn transition<C>(
    conn: &C,
    token: &str,
    from: PendingPaymentStatus,
    to: PendingPaymentStatus,
) -> Result<bool, ServiceError>
where
    C: ConnectionTrait,
{
    let mut update = PendingPaymentEntity::update_many()
        .col_expr(pending_payment::Column::Status, Expr::value(to))
        .col_expr(pending_payment::Column::UpdatedAt, Expr::value(Utc::now()));
    if to == PendingPaymentStatus::Abandoned {
        update = update.col_expr(
            pending_payment::Column::PaymentStatus,
            Expr::value(PaymentStatus::Failed),
        );
    }

    let result = update
        .filter(pending_payment::Column::Token.eq(token))
        .filter(pending_payment::Column::Status.eq(from))
        .exec(conn)
        .await?;
    Ok(result.rows_affected == 1)
}
