use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::order::{self, OrderStatus};
use crate::entities::order_item;
use crate::errors::ServiceError;

/// One line of a submit request, already resolved against the product
/// catalog snapshot (price, name, sku) at the moment of order creation.
#[derive(Clone, Debug)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    pub product_name: String,
    pub product_sku: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Clone, Debug)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub shipping_address_text: String,
    pub customer_notes: Option<String>,
    pub currency: String,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    /// One line per unique product_id. A request that repeats a
    /// product_id across multiple input lines is collapsed into a single
    /// row carrying the summed quantity before it ever reaches this struct.
    pub items: Vec<NewOrderItem>,
    /// Set at creation time rather than only once `InventoryWorker`
    /// successfully opens a reservation lease. This closes a gap the
    /// bus-level at-least-once model can't otherwise cover on its own: a
    /// simplified in-memory/Redis list bus has no broker-level redelivery,
    /// so if `orders.created` is never consumed (worker down, process
    /// crash before the reserve step), a lease is never opened and a
    /// lease-driven sweep would never see the order. Stamping the deadline
    /// here makes the sweep a safety net for *any* order stuck in
    /// `payment_required`, not only ones that got as far as reservation.
    pub reservation_expires_at: DateTime<Utc>,
}

/// Outcome of a conditional status transition. `Applied` means
/// the affected-row count was exactly one; any other observed state means
/// a concurrent writer already moved the order past `from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderTransition {
    Applied,
    NotApplied,
}

pub struct OrderRepository {
    db: Arc<DatabaseConnection>,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Inserts the order and its item snapshots inside the caller's
    /// transaction, so a sibling outbox-row insert (`OrderSubmit`) either
    /// commits alongside them or rolls back with them —
    /// the order row and its `orders.created` event can never disagree on
    /// existence.
    pub async fn create_in_txn(
        &self,
        txn: &impl ConnectionTrait,
        new_order: NewOrder,
    ) -> Result<order::Model, ServiceError> {
        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let active = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(new_order.user_id),
            status: Set(OrderStatus::PaymentRequired),
            subtotal: Set(new_order.subtotal),
            tax: Set(new_order.tax),
            total: Set(new_order.total),
            currency: Set(new_order.currency),
            shipping_address_text: Set(new_order.shipping_address_text),
            customer_notes: Set(new_order.customer_notes),
            reservation_expires_at: Set(Some(new_order.reservation_expires_at)),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            deleted_at: Set(None),
        };
        let order = active.insert(txn).await?;

        for item in &new_order.items {
            let total_price = item.unit_price * Decimal::from(item.quantity);
            let active_item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                product_name: Set(item.product_name.clone()),
                product_sku: Set(item.product_sku.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                total_price: Set(total_price),
                created_at: Set(now),
            };
            active_item.insert(txn).await?;
        }

        Ok(order)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        Ok(order::Entity::find_by_id(id).one(self.db.as_ref()).await?)
    }

    pub async fn find_items(&self, order_id: Uuid) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?)
    }

    /// The single primitive every cross-service status change goes
    /// through: `UPDATE orders SET status = to WHERE id = :id AND
    /// status = from AND deleted_at IS NULL`. Success iff exactly one row
    /// is affected; this is what makes concurrent InventoryWorker sweeps
    /// and PaymentWorker finalizations race-safe without an app-level
    /// lock.
    pub async fn conditional_transition(
        &self,
        conn: &impl ConnectionTrait,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<OrderTransition, ServiceError> {
        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, to.into())
            .col_expr(order::Column::UpdatedAt, Utc::now().into())
            .filter(order::Column::Id.eq(id))
            .filter(order::Column::Status.eq(from))
            .filter(order::Column::DeletedAt.is_null())
            .exec(conn)
            .await?;

        Ok(if result.rows_affected == 1 {
            OrderTransition::Applied
        } else {
            OrderTransition::NotApplied
        })
    }

    /// Records that a reservation lease is open for `id`, for the sweep
    /// loop's DB-backed candidate discovery.
    pub async fn set_reservation_expiry(
        &self,
        id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        order::Entity::update_many()
            .col_expr(order::Column::ReservationExpiresAt, expires_at.into())
            .filter(order::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    pub async fn clear_reservation_expiry(&self, id: Uuid) -> Result<(), ServiceError> {
        order::Entity::update_many()
            .col_expr(
                order::Column::ReservationExpiresAt,
                sea_orm::Value::from(None::<DateTime<Utc>>).into(),
            )
            .filter(order::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Candidates for the expiry sweep: still awaiting payment and past
    /// their reservation lease's nominal expiry, oldest first, capped at
    /// `limit` per tick.
    pub async fn find_expired_candidates(
        &self,
        limit: u64,
    ) -> Result<Vec<order::Model>, ServiceError> {
        let now = Utc::now();
        Ok(order::Entity::find()
            .filter(order::Column::Status.eq(OrderStatus::PaymentRequired))
            .filter(order::Column::ReservationExpiresAt.is_not_null())
            .filter(order::Column::ReservationExpiresAt.lte(now))
            .order_by_asc(order::Column::ReservationExpiresAt)
            .paginate(self.db.as_ref(), limit)
            .fetch_page(0)
            .await?)
    }
}
