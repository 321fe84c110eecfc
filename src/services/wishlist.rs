use crate::{
    db::DbPool,
    entities::{
        product::{self, Entity as ProductEntity},
        wishlist_item::{self, ActiveModel as WishlistItemActiveModel, Entity as WishlistItemEntity},
    },
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct WishlistEntry {
    pub product_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub in_stock: bool,
    pub added_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct WishlistService {
    db_pool: Arc<DbPool>,
}

impl WishlistService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn add(&self, user_id: Uuid, product_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db_pool;

        let product = ProductEntity::find_by_id(product_id)
            .filter(product::Column::DeletedAt.is_null())
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
        if product.quantity <= 0 {
            return Err(ServiceError::InsufficientStock(format!(
                "{} is out of stock",
                product.name
            )));
        }

        let existing = WishlistItemEntity::find()
            .filter(wishlist_item::Column::UserId.eq(user_id))
            .filter(wishlist_item::Column::ProductId.eq(product_id))
            .one(db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(
                "Product is already in the wishlist".to_string(),
            ));
        }

        WishlistItemActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            product_id: Set(product_id),
            created_at: Set(Utc::now()),
        }
        .insert(db)
        .await?;

        info!("added to wishlist");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<WishlistEntry>, ServiceError> {
        let rows = WishlistItemEntity::find()
            .filter(wishlist_item::Column::UserId.eq(user_id))
            .order_by_desc(wishlist_item::Column::CreatedAt)
            .find_also_related(ProductEntity)
            .all(&*self.db_pool)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(item, product)| {
                let product = product.filter(product::Model::is_available)?;
                Some(WishlistEntry {
                    product_id: product.id,
                    name: product.name,
                    price: product.price,
                    in_stock: product.quantity > 0,
                    added_at: item.created_at,
                })
            })
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, user_id: Uuid, product_id: Uuid) -> Result<(), ServiceError> {
        let result = WishlistItemEntity::delete_many()
            .filter(wishlist_item::Column::UserId.eq(user_id))
            .filter(wishlist_item::Column::ProductId.eq(product_id))
            .exec(&*self.db_pool)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(
                "Product is not in the wishlist".to_string(),
            ));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        Ok(WishlistItemEntity::delete_many()
            .filter(wishlist_item::Column::UserId.eq(user_id))
            .exec(&*self.db_pool)
            .await?
            .rows_affected)
    }
}
