use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::product;
use crate::errors::ServiceError;

pub struct ProductRepository {
    db: Arc<DatabaseConnection>,
}

impl ProductRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Resolves a set of product ids against the active catalog. Ids
    /// that are missing, soft-deleted, or inactive are
    /// simply absent from the returned list — the caller is responsible
    /// for noticing a short result and failing the whole submit with
    /// `product_not_found`.
    pub async fn find_active_by_ids(
        &self,
        ids: &[Uuid],
    ) -> Result<Vec<product::Model>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(product::Entity::find()
            .filter(product::Column::Id.is_in(ids.iter().copied()))
            .filter(product::Column::DeletedAt.is_null())
            .filter(product::Column::IsActive.eq(true))
            .all(self.db.as_ref())
            .await?)
    }
}
