//! The reservation expiry sweep: a peer background task, not
//! nested inside any handler, that reclaims stock for orders whose
//! reservation outlived its TTL without being paid or explicitly
//! cancelled. Candidate discovery goes through the DB-backed
//! `reservation_expires_at` index rather than a KV sorted set — a KV
//! outage degrades dedup and leases, but never blinds the sweep to an
//! expired order.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use crate::entities::order::OrderStatus;
use crate::errors::ServiceError;
use crate::events::{outbox, EventData};
use crate::kv::ReservationLeaseStore;
use crate::repositories::{InventoryRepository, OrderRepository, OrderTransition};
use crate::saga_metrics::SagaMetrics;
use sea_orm::{DatabaseConnection, TransactionTrait};

const CANDIDATE_BATCH_SIZE: u64 = 100;

pub struct ExpirySweep {
    db: Arc<DatabaseConnection>,
    orders: OrderRepository,
    inventory: InventoryRepository,
    leases: Arc<ReservationLeaseStore>,
    metrics: Arc<SagaMetrics>,
}

impl ExpirySweep {
    pub fn new(db: Arc<DatabaseConnection>, leases: Arc<ReservationLeaseStore>, metrics: Arc<SagaMetrics>) -> Self {
        Self {
            orders: OrderRepository::new(db.clone()),
            inventory: InventoryRepository::new(db.clone()),
            db,
            leases,
            metrics,
        }
    }

    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!("starting expiry sweep");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "sweep tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("expiry sweep shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass: find candidates past their reservation deadline, skip
    /// any whose KV lease is still alive (the lease's clock is treated
    /// as more current than the DB column when the two disagree), and
    /// cancel + release the rest.
    pub async fn tick(&self) -> Result<usize, ServiceError> {
        self.metrics.sweep_ticks_total.inc();
        let candidates = self.orders.find_expired_candidates(CANDIDATE_BATCH_SIZE).await?;
        let mut cancelled = 0;

        for order in candidates {
            if self.leases.exists(order.id).await {
                continue;
            }

            let items = self.orders.find_items(order.id).await?;
            let pairs: Vec<_> = items.into_iter().map(|i| (i.product_id, i.quantity)).collect();

            let txn = self.db.begin().await?;
            let transition = self
                .orders
                .conditional_transition(&txn, order.id, OrderStatus::PaymentRequired, OrderStatus::Cancelled)
                .await?;

            if transition != OrderTransition::Applied {
                // Some other writer (PaymentWorker, a direct cancel) beat
                // the sweep to this order; nothing left to reclaim.
                txn.commit().await?;
                self.orders.clear_reservation_expiry(order.id).await?;
                continue;
            }

            self.inventory.release_all_in_txn(&txn, order.id, &pairs).await?;
            outbox::enqueue(
                &txn,
                &EventData::InventoryReleased {
                    order_id: order.id,
                    reason: "reservation_expired".to_string(),
                },
            )
            .await?;
            outbox::enqueue(
                &txn,
                &EventData::OrdersCancelled {
                    order_id: order.id,
                    reason: "reservation_expired".to_string(),
                },
            )
            .await?;
            txn.commit().await?;

            self.leases.release(order.id).await;
            self.orders.clear_reservation_expiry(order.id).await?;
            self.metrics.sweep_cancellations_total.inc();
            self.metrics.live_reservation_leases.dec();
            cancelled += 1;
            info!(order_id = %order.id, "reservation expired, stock released");
        }

        Ok(cancelled)
    }
}
