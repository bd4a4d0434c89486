//! Outbox relay: the fix for OrderSubmit's publish-after-commit gap. A row
//! is appended to `outbox_events` in the *same* transaction as the write
//! that triggers it, so the event's existence never disagrees with the DB
//! state that produced it. A background loop claims pending rows and
//! publishes them to the bus, marking them `published` only after the
//! publish succeeds; a crash between publish and mark-published produces
//! an at-least-once redelivery, which every downstream handler already
//! tolerates via the processed-event dedup key.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseBackend, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, Statement, TransactionTrait,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::entities::outbox_event::{self, Entity as OutboxEvent};
use crate::errors::ServiceError;
use crate::events::bus::EventBus;
use crate::events::{EventData, EventEnvelope};

const STATUS_PENDING: &str = "pending";
const STATUS_PROCESSING: &str = "processing";
const STATUS_PUBLISHED: &str = "published";
const CLAIM_BATCH_SIZE: u64 = 50;

/// Maps an `EventData` variant to the topic it is published on.
pub fn topic_for(data: &EventData) -> &'static str {
    match data {
        EventData::OrdersCreated { .. } => "orders.created",
        EventData::OrdersPaid { .. } => "orders.paid",
        EventData::OrdersCancelled { .. } => "orders.cancelled",
        EventData::InventoryReserved { .. } => "inventory.reserved",
        EventData::InventoryReservationFailed { .. } => "inventory.out_of_stock",
        EventData::InventoryReleased { .. } => "inventory.released",
        EventData::PaymentsSucceeded { .. } => "payments.succeeded",
        EventData::PaymentsFailed { .. } => "payments.failed",
    }
}

/// Appends an outbox row for `data` inside the caller's transaction.
/// Callers write this alongside their own row insert/update so both commit
/// or roll back together; nothing here talks to the bus directly.
pub async fn enqueue(
    conn: &impl ConnectionTrait,
    data: &EventData,
) -> Result<EventEnvelope, ServiceError> {
    let envelope = EventEnvelope::new(data.clone());
    let now = Utc::now();

    let active = outbox_event::ActiveModel {
        id: Set(envelope.event_id),
        aggregate_type: Set(data.aggregate_type().to_string()),
        aggregate_id: Set(Some(data.order_id())),
        event_type: Set(data.event_type().to_string()),
        payload: Set(serde_json::to_value(&envelope).map_err(|e| {
            ServiceError::Internal(format!("failed to serialize outbox payload: {}", e))
        })?),
        status: Set(STATUS_PENDING.to_string()),
        attempts: Set(0),
        available_at: Set(now),
        created_at: Set(now),
        updated_at: Set(Some(now)),
    };
    active.insert(conn).await?;
    Ok(envelope)
}

/// The relay: polls `outbox_events` for pending rows, publishes each to
/// its topic, and marks it published. Runs as a peer background task, not
/// nested inside any handler (a single-binary layout is explicitly fine
/// as long as the expiry sweep and the relay remain independent loops).
pub struct OutboxRelay {
    db: Arc<DatabaseConnection>,
    bus: Arc<dyn EventBus>,
    poll_interval: Duration,
}

impl OutboxRelay {
    pub fn new(db: Arc<DatabaseConnection>, bus: Arc<dyn EventBus>, poll_interval: Duration) -> Self {
        Self {
            db,
            bus,
            poll_interval,
        }
    }

    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!("starting outbox relay");
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.drain_once().await {
                        error!(error = %e, "outbox relay pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("outbox relay shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Claims up to `CLAIM_BATCH_SIZE` pending rows, oldest first, and
    /// publishes them one at a time. A publish failure returns the row to
    /// `pending` with an incremented attempt counter so the next tick
    /// retries it; the row is never dropped on a transient bus error.
    ///
    /// Claiming moves a row `pending -> processing` inside its own
    /// transaction before anything is published. On Postgres this claim
    /// query uses `FOR UPDATE SKIP LOCKED` so two relay instances racing
    /// the same pending batch partition it between them instead of both
    /// publishing the same row. SQLite has no
    /// row-level locking and this crate only ever opens one connection to
    /// it, so the plain claim below is already exclusive there.
    pub async fn drain_once(&self) -> Result<usize, ServiceError> {
        let claimed = self.claim_batch().await?;
        let mut published = 0;
        for row in claimed {
            match self.publish_row(&row).await {
                Ok(()) => published += 1,
                Err(e) => {
                    warn!(event_id = %row.id, error = %e, "failed to publish outbox row, will retry");
                    self.requeue(&row).await;
                }
            }
        }
        Ok(published)
    }

    async fn claim_batch(&self) -> Result<Vec<outbox_event::Model>, ServiceError> {
        let now = Utc::now();
        let backend = self.db.get_database_backend();

        if backend == DatabaseBackend::Postgres {
            let txn = self.db.begin().await?;
            let stmt = Statement::from_sql_and_values(
                backend,
                r#"WITH claimed AS (
                    SELECT id FROM outbox_events
                     WHERE status = $1 AND available_at <= $2
                     ORDER BY created_at ASC
                     LIMIT $3
                     FOR UPDATE SKIP LOCKED
                )
                UPDATE outbox_events
                   SET status = $4, updated_at = $2
                 WHERE id IN (SELECT id FROM claimed)
                RETURNING id, aggregate_type, aggregate_id, event_type, payload, status, attempts, available_at, created_at, updated_at"#,
                vec![
                    STATUS_PENDING.to_string().into(),
                    now.into(),
                    (CLAIM_BATCH_SIZE as i64).into(),
                    STATUS_PROCESSING.to_string().into(),
                ],
            );
            let rows = OutboxEvent::find_by_statement(stmt).all(&txn).await?;
            txn.commit().await?;
            Ok(rows)
        } else {
            let pending = OutboxEvent::find()
                .filter(outbox_event::Column::Status.eq(STATUS_PENDING))
                .filter(outbox_event::Column::AvailableAt.lte(now))
                .order_by_asc(outbox_event::Column::CreatedAt)
                .paginate(self.db.as_ref(), CLAIM_BATCH_SIZE)
                .fetch_page(0)
                .await?;
            for row in &pending {
                let mut active: outbox_event::ActiveModel = row.clone().into();
                active.status = Set(STATUS_PROCESSING.to_string());
                active.updated_at = Set(Some(now));
                active.update(self.db.as_ref()).await?;
            }
            Ok(pending)
        }
    }

    async fn publish_row(&self, row: &outbox_event::Model) -> Result<(), ServiceError> {
        let envelope: EventEnvelope = serde_json::from_value(row.payload.clone())
            .map_err(|e| ServiceError::Internal(format!("corrupt outbox payload: {}", e)))?;
        let topic = topic_for(&envelope.data);

        self.bus
            .publish(topic, &envelope)
            .await
            .map_err(|e| ServiceError::EventBus(e.to_string()))?;

        let mut active: outbox_event::ActiveModel = row.clone().into();
        active.status = Set(STATUS_PUBLISHED.to_string());
        active.attempts = Set(row.attempts + 1);
        active.updated_at = Set(Some(Utc::now()));
        active.update(self.db.as_ref()).await?;

        debug!(event_id = %row.id, %topic, "published outbox event");
        Ok(())
    }

    /// Returns a claimed-but-unpublished row to `pending` so the next tick
    /// retries it.
    async fn requeue(&self, row: &outbox_event::Model) {
        let mut active: outbox_event::ActiveModel = row.clone().into();
        active.status = Set(STATUS_PENDING.to_string());
        active.attempts = Set(row.attempts + 1);
        active.updated_at = Set(Some(Utc::now()));
        if let Err(e) = active.update(self.db.as_ref()).await {
            error!(event_id = %row.id, error = %e, "failed to requeue outbox row after publish failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_for_matches_envelope_vocabulary() {
        let order_id = uuid::Uuid::new_v4();
        assert_eq!(
            topic_for(&EventData::OrdersCreated {
                order_id,
                user_id: order_id,
                items: vec![],
                total: rust_decimal::Decimal::ZERO,
                currency: "USD".to_string(),
            }),
            "orders.created"
        );
        assert_eq!(
            topic_for(&EventData::InventoryReservationFailed {
                order_id,
                product_id: order_id,
                reason: "out_of_stock".to_string(),
            }),
            "inventory.out_of_stock"
        );
    }
}
