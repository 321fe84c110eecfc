use crate::{
    db::DbPool,
    entities::{
        product::{self, Entity as ProductEntity},
        review::{self, ActiveModel as ReviewActiveModel, Entity as ReviewEntity},
    },
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, SqlErr,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewReview {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 5, message = "must be between 1 and 5"))]
    pub rating: i32,
    #[validate(length(min = 1, max = 2000, message = "must not be empty"))]
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReviewEdit {
    #[validate(range(min = 1, max = 5, message = "must be between 1 and 5"))]
    pub rating: i32,
    #[validate(length(min = 1, max = 2000, message = "must not be empty"))]
    pub comment: String,
}

/// Product reviews. A user reviews a product at most once and may only touch their own.
#[derive(Clone)]
pub struct ReviewService {
    db_pool: Arc<DbPool>,
}

impl ReviewService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self, input), fields(product_id = %input.product_id))]
    pub async fn add(&self, user_id: Uuid, input: NewReview) -> Result<review::Model, ServiceError> {
        input.validate()?;
        let comment = non_blank(&input.comment)?;
        let db = &*self.db_pool;

        ProductEntity::find_by_id(input.product_id)
            .filter(product::Column::DeletedAt.is_null())
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;

        let existing = ReviewEntity::find()
            .filter(review::Column::UserId.eq(user_id))
            .filter(review::Column::ProductId.eq(input.product_id))
            .one(db)
            .await?;
        if existing.is_some() {
            return Err(already_reviewed());
        }

        let now = Utc::now();
        let saved = ReviewActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            product_id: Set(input.product_id),
            rating: Set(input.rating),
            comment: Set(comment),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .map_err(|e| match e.sql_err() {
            // Lost a race with a concurrent submission for the same product.
            Some(SqlErr::UniqueConstraintViolation(_)) => already_reviewed(),
            _ => ServiceError::from(e),
        })?;

        info!(review_id = %saved.id, rating = saved.rating, "review added");
        Ok(saved)
    }

    #[instrument(skip(self, input))]
    pub async fn edit(
        &self,
        user_id: Uuid,
        review_id: Uuid,
        input: ReviewEdit,
    ) -> Result<review::Model, ServiceError> {
        input.validate()?;
        let comment = non_blank(&input.comment)?;

        let existing = self.find_owned(user_id, review_id).await?;
        let mut active: ReviewActiveModel = existing.into();
        active.rating = Set(input.rating);
        active.comment = Set(comment);
        active.updated_at = Set(Utc::now());

        let saved = active.update(&*self.db_pool).await?;
        info!(rating = saved.rating, "review edited");
        Ok(saved)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: Uuid, review_id: Uuid) -> Result<(), ServiceError> {
        let result = ReviewEntity::delete_many()
            .filter(review::Column::Id.eq(review_id))
            .filter(review::Column::UserId.eq(user_id))
            .exec(&*self.db_pool)
            .await?;
        if result.rows_affected == 0 {
            warn!("review not found for user");
            return Err(not_found());
        }
        Ok(())
    }

    /// Reviews of one product, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_product(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<review::Model>, ServiceError> {
        Ok(ReviewEntity::find()
            .filter(review::Column::ProductId.eq(product_id))
            .order_by_desc(review::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?)
    }

    async fn find_owned(&self, user_id: Uuid, review_id: Uuid) -> Result<review::Model, ServiceError> {
        ReviewEntity::find_by_id(review_id)
            .filter(review::Column::UserId.eq(user_id))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(not_found)
    }
}

fn non_blank(comment: &str) -> Result<String, ServiceError> {
    let trimmed = comment.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::ValidationError(
            "comment: must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

fn already_reviewed() -> ServiceError {
    ServiceError::Conflict("Product has already been reviewed".to_string())
}

fn not_found() -> ServiceError {
    ServiceError::NotFound("Review not found".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_outside_one_to_five_is_rejected() {
        for rating in [0, 6, -1] {
            let review = ReviewEdit {
                rating,
                comment: "fine".to_string(),
            };
            assert!(review.validate().is_err(), "rating {rating} accepted");
        }
        let review = ReviewEdit {
            rating: 5,
            comment: "great".to_string(),
        };
        assert!(review.validate().is_ok());
    }

    #[test]
    fn whitespace_comment_counts_as_empty() {
        assert!(matches!(
            non_blank("   "),
            Err(ServiceError::ValidationError(_))
        ));
        assert_eq!(non_blank("  solid  ").unwrap(), "solid");
    }
}
