use crate::{
    db::DbPool,
    entities::{
        cart_item::{self, ActiveModel as CartItemActiveModel, Entity as CartItemEntity},
        product::{self, Entity as ProductEntity},
    },
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A cart line joined with the live product row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub product: product::Model,
    pub quantity: i32,
    pub line_total: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CartLineView {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
    pub in_stock: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CartView {
    pub items: Vec<CartLineView>,
    pub total_quantity: i32,
    pub subtotal: Decimal,
}

#[derive(Clone)]
pub struct CartService {
    db_pool: Arc<DbPool>,
    max_line_quantity: i32,
}

impl CartService {
    pub fn new(db_pool: Arc<DbPool>, max_line_quantity: i32) -> Self {
        Self {
            db_pool,
            max_line_quantity,
        }
    }

    /// Reads the user's cart in insertion order, joined with current product data.
    pub async fn snapshot<C>(conn: &C, user_id: Uuid) -> Result<Vec<CartLine>, ServiceError>
    where
        C: ConnectionTrait,
    {
        let rows = CartItemEntity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .find_also_related(ProductEntity)
            .all(conn)
            .await?;

        if rows.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        rows.into_iter()
            .map(|(item, product)| match product {
                Some(product) if product.is_available() => Ok(CartLine {
                    product,
                    quantity: item.quantity,
                    line_total: item.line_total,
                }),
                _ => Err(ServiceError::NotFound(format!(
                    "Product {} in cart no longer exists",
                    item.product_id
                ))),
            })
            .collect()
    }

    /// Deletes the user's cart lines, restricted to `product_ids` when given.
    pub async fn clear_lines<C>(
        conn: &C,
        user_id: Uuid,
        product_ids: Option<Vec<Uuid>>,
    ) -> Result<u64, ServiceError>
    where
        C: ConnectionTrait,
    {
        let mut delete =
            CartItemEntity::delete_many().filter(cart_item::Column::UserId.eq(user_id));
        if let Some(ids) = product_ids {
            delete = delete.filter(cart_item::Column::ProductId.is_in(ids));
        }
        Ok(delete.exec(conn).await?.rows_affected)
    }

    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let db = &*self.db_pool;
        let product = self.find_product(product_id).await?;
        let existing = self.find_line(user_id, product_id).await?;
        let new_quantity = existing.as_ref().map_or(0, |l| l.quantity) + quantity;
        self.check_line_quantity(&product, new_quantity)?;

        let now = Utc::now();
        let line_total = product.price * Decimal::from(new_quantity);

        match existing {
            Some(line) => {
                let mut active: CartItemActiveModel = line.into();
                active.quantity = Set(new_quantity);
                active.line_total = Set(line_total);
                active.updated_at = Set(now);
                active.update(db).await?;
            }
            None => {
                CartItemActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    product_id: Set(product_id),
                    quantity: Set(new_quantity),
                    line_total: Set(line_total),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(db)
                .await?;
            }
        }

        info!(quantity = new_quantity, "cart line saved");
        self.view_cart(user_id).await
    }

    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id))]
    pub async fn update_quantity(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let line = self
            .find_line(user_id, product_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product is not in the cart".to_string()))?;
        let product = self.find_product(product_id).await?;
        self.check_line_quantity(&product, quantity)?;

        let mut active: CartItemActiveModel = line.into();
        active.quantity = Set(quantity);
        active.line_total = Set(product.price * Decimal::from(quantity));
        active.updated_at = Set(Utc::now());
        active.update(&*self.db_pool).await?;

        self.view_cart(user_id).await
    }

    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id))]
    pub async fn remove_item(&self, user_id: Uuid, product_id: Uuid) -> Result<(), ServiceError> {
        let result = CartItemEntity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(&*self.db_pool)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(
                "Product is not in the cart".to_string(),
            ));
        }
        Ok(())
    }

    /// Current cart with live prices. An empty cart is an empty view, not an error.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn view_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let rows = CartItemEntity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .find_also_related(ProductEntity)
            .all(&*self.db_pool)
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        for (line, product) in rows {
            let Some(product) = product else {
                warn!(product_id = %line.product_id, "cart line references missing product");
                continue;
            };
            items.push(CartLineView {
                product_id: product.id,
                name: product.name.clone(),
                unit_price: product.price,
                quantity: line.quantity,
                line_total: product.price * Decimal::from(line.quantity),
                in_stock: product.is_available() && product.quantity >= line.quantity,
            });
        }

        Ok(CartView {
            total_quantity: items.iter().map(|i| i.quantity).sum(),
            subtotal: items.iter().map(|i| i.line_total).sum(),
            items,
        })
    }

    async fn find_product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        ProductEntity::find_by_id(product_id)
            .one(&*self.db_pool)
            .await?
            .filter(product::Model::is_available)
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    async fn find_line(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<cart_item::Model>, ServiceError> {
        Ok(CartItemEntity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&*self.db_pool)
            .await?)
    }

    fn check_line_quantity(
        &self,
        product: &product::Model,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity > self.max_line_quantity {
            return Err(ServiceError::LimitExceeded(format!(
                "At most {} units of a product per order",
                self.max_line_quantity
            )));
        }
        if quantity > product.quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} of {} left in stock",
                product.quantity, product.name
            )));
        }
        Ok(())
    }
}
