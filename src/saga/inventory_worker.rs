//! InventoryWorker: consumes `orders.created`, `orders.paid` and
//! `orders.cancelled`, and owns the reserve/finalize/release primitives
//! that keep `inventory.available` correct under concurrent access. Each
//! topic is its own consumer loop so a slow handler on one topic never
//! backs up the other two.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;
use crate::events::bus::EventBus;
use crate::events::{outbox, EventData, EventEnvelope};
use crate::kv::{ProcessedEventStore, ReservationLeaseStore};
use crate::repositories::inventory_repository::ReservationOutcome;
use crate::repositories::{InventoryRepository, OrderRepository, OrderTransition};
use crate::saga_metrics::SagaMetrics;
use sea_orm::{DatabaseConnection, TransactionTrait};

pub struct InventoryWorker {
    db: Arc<DatabaseConnection>,
    bus: Arc<dyn EventBus>,
    orders: OrderRepository,
    inventory: InventoryRepository,
    leases: Arc<ReservationLeaseStore>,
    processed: Arc<ProcessedEventStore>,
    metrics: Arc<SagaMetrics>,
}

impl InventoryWorker {
    pub fn new(
        db: Arc<DatabaseConnection>,
        bus: Arc<dyn EventBus>,
        leases: Arc<ReservationLeaseStore>,
        processed: Arc<ProcessedEventStore>,
        metrics: Arc<SagaMetrics>,
    ) -> Self {
        Self {
            orders: OrderRepository::new(db.clone()),
            inventory: InventoryRepository::new(db.clone()),
            db,
            bus,
            leases,
            processed,
            metrics,
        }
    }

    /// Spawns one consumer loop per topic and blocks until all three have
    /// observed the shutdown signal.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        info!("starting inventory worker");
        let created = tokio::spawn(self.clone().consume_created(shutdown.clone()));
        let paid = tokio::spawn(self.clone().consume_paid(shutdown.clone()));
        let cancelled = tokio::spawn(self.clone().consume_cancelled(shutdown));
        let _ = tokio::join!(created, paid, cancelled);
        info!("inventory worker shut down");
    }

    async fn consume_created(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                received = self.bus.receive("orders.created") => {
                    match received {
                        Ok(envelope) => {
                            if let Err(e) = self.handle_orders_created(envelope).await {
                                warn!(error = %e, "orders.created handling failed, will redeliver");
                            }
                        }
                        Err(e) => error!(error = %e, "failed to receive orders.created"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() { break; }
                }
            }
        }
    }

    async fn consume_paid(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                received = self.bus.receive("orders.paid") => {
                    match received {
                        Ok(envelope) => {
                            if let Err(e) = self.handle_orders_paid(envelope).await {
                                warn!(error = %e, "orders.paid handling failed, will redeliver");
                            }
                        }
                        Err(e) => error!(error = %e, "failed to receive orders.paid"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() { break; }
                }
            }
        }
    }

    async fn consume_cancelled(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                received = self.bus.receive("orders.cancelled") => {
                    match received {
                        Ok(envelope) => {
                            if let Err(e) = self.handle_orders_cancelled(envelope).await {
                                warn!(error = %e, "orders.cancelled handling failed, will redeliver");
                            }
                        }
                        Err(e) => error!(error = %e, "failed to receive orders.cancelled"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() { break; }
                }
            }
        }
    }

    /// Dedup, open a reservation lease, reserve every line. On
    /// out-of-stock the order is conditionally cancelled and both
    /// `inventory.out_of_stock` and `orders.cancelled` are enqueued in
    /// one transaction. A DB error propagates so the caller logs and the
    /// event is redelivered rather than acked (no dedup key was set for
    /// it — `mark_processed` already returned before this point, so a
    /// genuine redelivery here only happens if the bus itself redelivers
    /// on a consumer crash, which idempotent handling tolerates).
    async fn handle_orders_created(&self, envelope: EventEnvelope) -> Result<(), crate::errors::ServiceError> {
        let (order_id, items) = match envelope.data {
            EventData::OrdersCreated { order_id, items, .. } => (order_id, items),
            _ => return Ok(()),
        };

        if !self.processed.mark_processed(envelope.event_id).await {
            return Ok(());
        }

        let opened = self.leases.acquire(order_id).await;
        if !opened {
            info!(%order_id, "reservation lease already open, skipping duplicate orders.created");
            return Ok(());
        }

        let pairs: Vec<(Uuid, i32)> = items.into_iter().map(|i| (i.product_id, i.quantity)).collect();
        self.metrics.reservation_attempts_total.inc();

        match self.inventory.reserve_all(order_id, &pairs).await {
            Ok(ReservationOutcome::Reserved) => {
                self.metrics.reservation_success_total.inc();
                self.metrics.live_reservation_leases.inc();
                info!(%order_id, "inventory reserved");
                Ok(())
            }
            Ok(ReservationOutcome::OutOfStock { product_id }) => {
                self.metrics.reservation_out_of_stock_total.inc();
                self.leases.release(order_id).await;

                let txn = self.db.begin().await?;
                let transition = self
                    .orders
                    .conditional_transition(&txn, order_id, OrderStatus::PaymentRequired, OrderStatus::Cancelled)
                    .await?;
                if transition == OrderTransition::Applied {
                    outbox::enqueue(
                        &txn,
                        &EventData::InventoryReservationFailed {
                            order_id,
                            product_id,
                            reason: "out_of_stock".to_string(),
                        },
                    )
                    .await?;
                    outbox::enqueue(
                        &txn,
                        &EventData::OrdersCancelled {
                            order_id,
                            reason: "out_of_stock".to_string(),
                        },
                    )
                    .await?;
                }
                txn.commit().await?;
                self.orders.clear_reservation_expiry(order_id).await?;
                warn!(%order_id, %product_id, "reservation failed, out of stock");
                Ok(())
            }
            Err(e) => {
                // Release the lease so a later redelivery of this event
                // isn't skipped as a duplicate-in-flight reservation.
                self.leases.release(order_id).await;
                Err(e)
            }
        }
    }

    /// Stock sold. A missing lease means the sweep likely already
    /// released this order's stock — the conditional status transition
    /// upstream (`PaymentWorker`) already guards against that race, so
    /// this handler only needs to finalize and clean up local state.
    async fn handle_orders_paid(&self, envelope: EventEnvelope) -> Result<(), crate::errors::ServiceError> {
        let order_id = match envelope.data {
            EventData::OrdersPaid { order_id } => order_id,
            _ => return Ok(()),
        };

        if !self.processed.mark_processed(envelope.event_id).await {
            return Ok(());
        }
        if !self.leases.exists(order_id).await {
            info!(%order_id, "no live reservation lease at orders.paid, treating as already finalized");
            return Ok(());
        }

        let items = self.resolve_items(order_id).await?;
        self.inventory.finalize_all(order_id, &items).await?;
        self.leases.release(order_id).await;
        self.orders.clear_reservation_expiry(order_id).await?;
        self.metrics.live_reservation_leases.dec();
        info!(%order_id, "inventory finalized");
        Ok(())
    }

    /// Reservation abandoned (payment failed or the order was
    /// cancelled some other way) — release the held stock back to
    /// `available`.
    async fn handle_orders_cancelled(&self, envelope: EventEnvelope) -> Result<(), crate::errors::ServiceError> {
        let order_id = match envelope.data {
            EventData::OrdersCancelled { order_id, .. } => order_id,
            _ => return Ok(()),
        };

        if !self.processed.mark_processed(envelope.event_id).await {
            return Ok(());
        }
        if !self.leases.exists(order_id).await {
            info!(%order_id, "no live reservation lease at orders.cancelled, nothing to release");
            return Ok(());
        }

        let items = self.resolve_items(order_id).await?;
        self.inventory.release_all(order_id, &items).await?;
        self.leases.release(order_id).await;
        self.orders.clear_reservation_expiry(order_id).await?;
        self.metrics.live_reservation_leases.dec();
        info!(%order_id, "inventory released");
        Ok(())
    }

    async fn resolve_items(&self, order_id: Uuid) -> Result<Vec<(Uuid, i32)>, crate::errors::ServiceError> {
        let rows = self.orders.find_items(order_id).await?;
        Ok(rows.into_iter().map(|r| (r.product_id, r.quantity)).collect())
    }
}
