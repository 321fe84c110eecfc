use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::order::PaymentStatus;

/// Placeholder for a gateway order awaiting the processor callback.
///
/// Keyed by the processor's order token. Stock for `items` stays reserved while the row is
/// `Pending` or `Capturing`. A callback claims the row as `Capturing` before it talks to the
/// processor and either settles it as `Completed` or hands it back as `Pending`; only
/// `Pending` rows can become `Abandoned`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pending_payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub token: String,
    pub user_id: Uuid,
    pub address_id: Uuid,
    pub coupon_id: Option<Uuid>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub discount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub coupon_discount: Decimal,
    pub quantity: i32,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub settlement_amount: Decimal,
    pub settlement_currency: String,
    pub status: PendingPaymentStatus,
    pub payment_status: PaymentStatus,
    /// Priced lines captured when the intent was created.
    #[sea_orm(column_type = "Json")]
    pub items: Json,
    pub order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum PendingPaymentStatus {
    #[sea_orm(string_value = "Pending")]
    Pending,
    #[sea_orm(string_value = "Capturing")]
    Capturing,
    #[sea_orm(string_value = "Completed")]
    Completed,
    #[sea_orm(string_value = "Abandoned")]
    Abandoned,
}
