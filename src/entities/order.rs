use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::EnumString;

/// A committed order. Created only by the settlement transaction.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    pub user_id: Uuid,
    pub address_id: Uuid,
    /// Processor order token for gateway payments.
    pub payment_id: Option<String>,
    pub coupon_id: Option<Uuid>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub total: Decimal,
    /// Offer discounts plus the coupon discount.
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub discount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub coupon_discount: Decimal,
    pub quantity: i32,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub method: PaymentMethod,
    pub return_reason: Option<String>,
    pub order_date: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum OrderStatus {
    #[sea_orm(string_value = "Pending")]
    Pending,
    #[sea_orm(string_value = "Processing")]
    Processing,
    #[sea_orm(string_value = "Shipped")]
    Shipped,
    #[sea_orm(string_value = "Delivered")]
    Delivered,
    #[sea_orm(string_value = "Canceled")]
    Canceled,
    #[sea_orm(string_value = "Failed")]
    Failed,
    #[sea_orm(string_value = "Returned")]
    Returned,
}

impl OrderStatus {
    /// Statuses from which the customer may still cancel.
    pub fn is_cancellable(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Processing)
    }

    /// Transitions an administrator may apply directly. Returns go through the return flow.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match self {
            Pending | Processing => matches!(next, Shipped | Canceled | Failed),
            Shipped => matches!(next, Delivered),
            Delivered | Canceled | Failed | Returned => false,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "Pending")]
    Pending,
    #[sea_orm(string_value = "Processing")]
    Processing,
    #[sea_orm(string_value = "Success")]
    Success,
    #[sea_orm(string_value = "Failed")]
    Failed,
}

/// How the customer pays. Selected by the `method` field of the order request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, EnumString, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[strum(ascii_case_insensitive)]
pub enum PaymentMethod {
    #[sea_orm(string_value = "COD")]
    #[serde(rename = "COD", alias = "cod", alias = "Cod")]
    #[strum(serialize = "COD")]
    Cod,
    #[sea_orm(string_value = "Gateway")]
    #[serde(alias = "gateway", alias = "PayPal", alias = "Paypal", alias = "paypal")]
    #[strum(serialize = "Gateway", serialize = "PayPal")]
    Gateway,
    #[sea_orm(string_value = "Wallet")]
    #[serde(alias = "wallet")]
    #[strum(serialize = "Wallet")]
    Wallet,
}

impl PaymentMethod {
    /// Methods whose money was taken up front and must be refunded on cancellation.
    pub fn is_prepaid(self) -> bool {
        matches!(self, PaymentMethod::Gateway | PaymentMethod::Wallet)
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_value())
    }
}
