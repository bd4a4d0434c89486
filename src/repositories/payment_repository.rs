//! The idempotent payment write: a `payments` row keyed by
//! `(provider, provider_payment_id)`, upserted rather than inserted, so a
//! redelivered `payment.succeeded` event for a provider id already on file
//! lands as a no-op update instead of a duplicate row or a unique-
//! constraint error the caller has to special-case.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::payment::{self, PaymentStatus};
use crate::errors::ServiceError;

pub struct PaymentRepository {
    db: Arc<DatabaseConnection>,
}

impl PaymentRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Upserts the payment row for a given provider id. The conflict
    /// target is `provider_payment_id`, not `id` — a redelivered
    /// `payment.succeeded`/`payment.failed` for the same provider charge
    /// updates `status` and `updated_at` on the existing row rather than
    /// creating a second one.
    pub async fn upsert(
        &self,
        order_id: Uuid,
        provider: &str,
        provider_payment_id: &str,
        amount: Decimal,
        currency: &str,
        status: PaymentStatus,
    ) -> Result<payment::Model, ServiceError> {
        self.upsert_in_txn(
            self.db.as_ref(),
            order_id,
            provider,
            provider_payment_id,
            amount,
            currency,
            status,
        )
        .await
    }

    /// Same upsert, against a caller-supplied connection — used by
    /// `PaymentWorker` so the payment row and the order's conditional
    /// status transition commit or roll back together.
    pub async fn upsert_in_txn(
        &self,
        conn: &impl ConnectionTrait,
        order_id: Uuid,
        provider: &str,
        provider_payment_id: &str,
        amount: Decimal,
        currency: &str,
        status: PaymentStatus,
    ) -> Result<payment::Model, ServiceError> {
        let now = Utc::now();
        let active = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            provider: Set(provider.to_string()),
            provider_payment_id: Set(provider_payment_id.to_string()),
            amount: Set(amount),
            currency: Set(currency.to_string()),
            status: Set(status),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        payment::Entity::insert(active)
            .on_conflict(
                OnConflict::column(payment::Column::ProviderPaymentId)
                    .update_columns([payment::Column::Status, payment::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;

        payment::Entity::find()
            .filter(payment::Column::Provider.eq(provider))
            .filter(payment::Column::ProviderPaymentId.eq(provider_payment_id))
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::Internal("payment upsert did not produce a row".to_string())
            })
    }

    pub async fn find_by_provider_id(
        &self,
        provider: &str,
        provider_payment_id: &str,
    ) -> Result<Option<payment::Model>, ServiceError> {
        Ok(payment::Entity::find()
            .filter(payment::Column::Provider.eq(provider))
            .filter(payment::Column::ProviderPaymentId.eq(provider_payment_id))
            .one(self.db.as_ref())
            .await?)
    }

    pub async fn find_by_order_id(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<payment::Model>, ServiceError> {
        Ok(payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .all(self.db.as_ref())
            .await?)
    }
}
