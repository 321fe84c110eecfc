use crate::{
    db::DbPool,
    entities::coupon::{self, Entity as CouponEntity},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use tracing::instrument;

#[derive(Clone)]
pub struct CouponService {
    db_pool: Arc<DbPool>,
}

impl CouponService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Active coupons whose validity window contains the current time.
    #[instrument(skip(self))]
    pub async fn list_available(&self) -> Result<Vec<coupon::Model>, ServiceError> {
        let now = Utc::now();
        let coupons = CouponEntity::find()
            .filter(coupon::Column::IsActive.eq(true))
            .order_by_asc(coupon::Column::Code)
            .all(&*self.db_pool)
            .await?;

        Ok(coupons
            .into_iter()
            .filter(|c| c.is_within_window(now))
            .collect())
    }
}
