use crate::{
    db::DbPool,
    entities::address::{self, ActiveModel as AddressActiveModel, Entity as AddressEntity},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewAddress {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 200))]
    pub line1: String,
    #[validate(length(max = 200))]
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 100))]
    pub state: String,
    #[validate(length(min = 3, max = 12))]
    pub postal_code: String,
    #[validate(length(min = 2, max = 56))]
    pub country: String,
    #[validate(length(min = 7, max = 20))]
    pub phone: String,
}

/// Delivery addresses. Deletion is soft so past orders keep their reference.
#[derive(Clone)]
pub struct AddressService {
    db_pool: Arc<DbPool>,
}

impl AddressService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self, input))]
    pub async fn add(&self, user_id: Uuid, input: NewAddress) -> Result<address::Model, ServiceError> {
        input.validate()?;

        let saved = AddressActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            name: Set(input.name.trim().to_string()),
            line1: Set(input.line1.trim().to_string()),
            line2: Set(input
                .line2
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())),
            city: Set(input.city.trim().to_string()),
            state: Set(input.state.trim().to_string()),
            postal_code: Set(input.postal_code.trim().to_string()),
            country: Set(input.country.trim().to_string()),
            phone: Set(input.phone.trim().to_string()),
            deleted_at: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db_pool)
        .await?;

        info!(address_id = %saved.id, "address added");
        Ok(saved)
    }

    /// Replaces every field of one of the user's live addresses.
    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        user_id: Uuid,
        address_id: Uuid,
        input: NewAddress,
    ) -> Result<address::Model, ServiceError> {
        input.validate()?;

        let existing = AddressEntity::find_by_id(address_id)
            .filter(address::Column::UserId.eq(user_id))
            .filter(address::Column::DeletedAt.is_null())
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Address not found".to_string()))?;

        let mut active: AddressActiveModel = existing.into();
        active.name = Set(input.name.trim().to_string());
        active.line1 = Set(input.line1.trim().to_string());
        active.line2 = Set(input
            .line2
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty()));
        active.city = Set(input.city.trim().to_string());
        active.state = Set(input.state.trim().to_string());
        active.postal_code = Set(input.postal_code.trim().to_string());
        active.country = Set(input.country.trim().to_string());
        active.phone = Set(input.phone.trim().to_string());

        let saved = active.update(&*self.db_pool).await?;
        info!(address_id = %saved.id, "address updated");
        Ok(saved)
    }

    #[instrument(skip(self))]
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<address::Model>, ServiceError> {
        Ok(AddressEntity::find()
            .filter(address::Column::UserId.eq(user_id))
            .filter(address::Column::DeletedAt.is_null())
            .order_by_asc(address::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: Uuid, address_id: Uuid) -> Result<(), ServiceError> {
        let result = AddressEntity::update_many()
            .col_expr(address::Column::DeletedAt, Expr::value(Some(Utc::now())))
            .filter(address::Column::Id.eq(address_id))
            .filter(address::Column::UserId.eq(user_id))
            .filter(address::Column::DeletedAt.is_null())
            .exec(&*self.db_pool)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound("Address not found".to_string()));
        }
        Ok(())
    }
}
