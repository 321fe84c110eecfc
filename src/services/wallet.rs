use crate::{
    db::DbPool,
    entities::{
        wallet::{self, ActiveModel as WalletActiveModel, Entity as WalletEntity},
        wallet_transaction::{
            self, ActiveModel as WalletTransactionActiveModel, Entity as WalletTransactionEntity,
            TransactionType,
        },
    },
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct WalletView {
    pub user_id: Uuid,
    pub balance: Decimal,
}

/// Wallet balances and their transaction history.
///
/// `credit` and `debit` run on the caller's transaction and always write the
/// matching `wallet_transactions` row alongside the balance change.
#[derive(Clone)]
pub struct WalletService {
    db_pool: Arc<DbPool>,
}

impl WalletService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Adds `amount` to the user's wallet, creating the wallet on first use.
    #[instrument(skip(conn, description))]
    pub async fn credit<C>(
        conn: &C,
        user_id: Uuid,
        amount: Decimal,
        order_id: Option<Uuid>,
        description: String,
    ) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        ensure_non_negative(amount)?;
        let now = Utc::now();

        WalletEntity::insert(WalletActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            balance: Set(Decimal::ZERO),
            created_at: Set(now),
            updated_at: Set(now),
        })
        .on_conflict(
            OnConflict::column(wallet::Column::UserId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

        WalletEntity::update_many()
            .col_expr(
                wallet::Column::Balance,
                Expr::col(wallet::Column::Balance).add(amount),
            )
            .col_expr(wallet::Column::UpdatedAt, Expr::value(now))
            .filter(wallet::Column::UserId.eq(user_id))
            .exec(conn)
            .await?;

        record(conn, user_id, order_id, amount, TransactionType::Credit, description).await?;
        metrics::counter!("storefront_wallet_transactions_total", 1, "type" => "credit");
        info!("wallet credited");
        Ok(())
    }

    /// Takes `amount` from the user's wallet if the balance covers it.
    #[instrument(skip(conn, description))]
    pub async fn debit<C>(
        conn: &C,
        user_id: Uuid,
        amount: Decimal,
        order_id: Option<Uuid>,
        description: String,
    ) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        ensure_non_negative(amount)?;

        let result = WalletEntity::update_many()
            .col_expr(
                wallet::Column::Balance,
                Expr::col(wallet::Column::Balance).sub(amount),
            )
            .col_expr(wallet::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(wallet::Column::UserId.eq(user_id))
            .filter(wallet::Column::Balance.gte(amount))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            warn!("wallet balance too low");
            return Err(ServiceError::InsufficientFunds(format!(
                "Wallet balance does not cover {}",
                amount
            )));
        }

        record(conn, user_id, order_id, amount, TransactionType::Debit, description).await?;
        metrics::counter!("storefront_wallet_transactions_total", 1, "type" => "debit");
        Ok(())
    }

    /// Current balance; a user without a wallet has zero.
    #[instrument(skip(self))]
    pub async fn view_wallet(&self, user_id: Uuid) -> Result<WalletView, ServiceError> {
        let balance = WalletEntity::find()
            .filter(wallet::Column::UserId.eq(user_id))
            .one(&*self.db_pool)
            .await?
            .map_or(Decimal::ZERO, |w| w.balance);

        Ok(WalletView { user_id, balance })
    }

    #[instrument(skip(self))]
    pub async fn list_transactions(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<wallet_transaction::Model>, ServiceError> {
        Ok(WalletTransactionEntity::find()
            .filter(wallet_transaction::Column::UserId.eq(user_id))
            .order_by_desc(wallet_transaction::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?)
    }
}

async fn record<C>(
    conn: &C,
    user_id: Uuid,
    order_id: Option<Uuid>,
    amount: Decimal,
    transaction_type: TransactionType,
    description: String,
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    WalletTransactionActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        order_id: Set(order_id),
        amount: Set(amount),
        transaction_type: Set(transaction_type),
        description: Set(description),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;
    Ok(())
}

fn ensure_non_negative(amount: Decimal) -> Result<(), ServiceError> {
    if amount < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Wallet amounts cannot be negative".to_string(),
        ));
    }
    Ok(())
}
