use crate::{
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// A quantity of one product to take from or return to stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Stock mutations on `products.quantity`.
///
/// Every call runs on the caller's connection, which is expected to be an open
/// transaction, so a failed order never leaves a partial reservation behind.
/// Each mutation is one conditional `UPDATE`, which the database serializes per row.
pub struct InventoryLedger;

impl InventoryLedger {
    /// Takes `quantity` units of a product out of stock.
    #[instrument(skip(conn))]
    pub async fn reserve<C>(conn: &C, product_id: Uuid, quantity: i32) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        ensure_positive(quantity)?;

        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::Quantity,
                Expr::col(product::Column::Quantity).sub(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::Quantity.gte(quantity))
            .filter(product::Column::DeletedAt.is_null())
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(Self::explain_shortfall(conn, product_id, quantity).await);
        }

        metrics::counter!("storefront_inventory_units_reserved_total", quantity as u64);
        debug!("stock reserved");
        Ok(())
    }

    /// Puts `quantity` units of a product back into stock.
    #[instrument(skip(conn))]
    pub async fn release<C>(conn: &C, product_id: Uuid, quantity: i32) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        ensure_positive(quantity)?;

        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::Quantity,
                Expr::col(product::Column::Quantity).add(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            warn!("release for unknown product");
            return Err(ServiceError::NotFound(format!(
                "Product {} not found",
                product_id
            )));
        }

        metrics::counter!("storefront_inventory_units_released_total", quantity as u64);
        Ok(())
    }

    /// Reserves every line; stops at the first shortfall.
    pub async fn reserve_all<C>(conn: &C, lines: &[StockLine]) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        for line in lines {
            Self::reserve(conn, line.product_id, line.quantity).await?;
        }
        Ok(())
    }

    pub async fn release_all<C>(conn: &C, lines: &[StockLine]) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        for line in lines {
            Self::release(conn, line.product_id, line.quantity).await?;
        }
        Ok(())
    }

    async fn explain_shortfall<C>(conn: &C, product_id: Uuid, requested: i32) -> ServiceError
    where
        C: ConnectionTrait,
    {
        match ProductEntity::find_by_id(product_id).one(conn).await {
            Ok(Some(p)) if p.is_available() => {
                warn!(available = p.quantity, requested, "insufficient stock");
                ServiceError::InsufficientStock(format!(
                    "Only {} of {} left in stock",
                    p.quantity, p.name
                ))
            }
            Ok(_) => ServiceError::NotFound(format!("Product {} not found", product_id)),
            Err(e) => ServiceError::DatabaseError(e),
        }
    }
}

fn ensure_positive(quantity: i32) -> Result<(), ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "Quantity must be positive, got {}",
            quantity
        )));
    }
    Ok(())
}
