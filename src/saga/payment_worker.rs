//! PaymentWorker: consumes `inventory.reserved`, simulates a
//! payment outcome deterministically, and moves the order to `paid` or
//! `cancelled` via the same conditional-transition primitive everything
//! else in the saga uses.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::entities::order::OrderStatus;
use crate::entities::payment::PaymentStatus;
use crate::errors::ServiceError;
use crate::events::bus::EventBus;
use crate::events::{outbox, EventData, EventEnvelope};
use crate::kv::{ProcessedEventStore, ReservationLeaseStore};
use crate::repositories::{OrderRepository, OrderTransition, PaymentRepository};
use crate::saga::payment_simulator;
use crate::saga_metrics::SagaMetrics;
use sea_orm::{DatabaseConnection, TransactionTrait};

pub struct PaymentWorker {
    db: Arc<DatabaseConnection>,
    bus: Arc<dyn EventBus>,
    orders: OrderRepository,
    payments: PaymentRepository,
    leases: Arc<ReservationLeaseStore>,
    processed: Arc<ProcessedEventStore>,
    metrics: Arc<SagaMetrics>,
    success_numerator: i64,
    success_denominator: i64,
}

impl PaymentWorker {
    pub fn new(
        db: Arc<DatabaseConnection>,
        bus: Arc<dyn EventBus>,
        leases: Arc<ReservationLeaseStore>,
        processed: Arc<ProcessedEventStore>,
        metrics: Arc<SagaMetrics>,
        success_numerator: i64,
        success_denominator: i64,
    ) -> Self {
        Self {
            orders: OrderRepository::new(db.clone()),
            payments: PaymentRepository::new(db.clone()),
            db,
            bus,
            leases,
            processed,
            metrics,
            success_numerator,
            success_denominator,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("starting payment worker");
        loop {
            tokio::select! {
                received = self.bus.receive("inventory.reserved") => {
                    match received {
                        Ok(envelope) => {
                            if let Err(e) = self.handle_inventory_reserved(envelope).await {
                                warn!(error = %e, "inventory.reserved handling failed, will redeliver");
                            }
                        }
                        Err(e) => error!(error = %e, "failed to receive inventory.reserved"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() { break; }
                }
            }
        }
        info!("payment worker shut down");
    }

    /// Dedup, re-verify the reservation lease is still
    /// live, decide a deterministic outcome from the order's total, and
    /// apply it through a single transaction combining the payment
    /// upsert, the conditional order transition, and the resulting
    /// outbox rows.
    async fn handle_inventory_reserved(&self, envelope: EventEnvelope) -> Result<(), ServiceError> {
        let order_id = match envelope.data {
            EventData::InventoryReserved { order_id } => order_id,
            _ => return Ok(()),
        };

        if !self.processed.mark_processed(envelope.event_id).await {
            return Ok(());
        }
        if !self.leases.exists(order_id).await {
            info!(%order_id, "no live reservation lease at inventory.reserved, skipping payment");
            return Ok(());
        }

        let order = match self.orders.find_by_id(order_id).await? {
            Some(order) if order.status == OrderStatus::PaymentRequired => order,
            _ => {
                info!(%order_id, "order no longer payment_required, skipping payment");
                return Ok(());
            }
        };

        let succeeded = payment_simulator::decide(
            order.total,
            self.success_numerator,
            self.success_denominator,
        );
        let provider_payment_id = format!("sim-{}", order_id);
        let payment_status = if succeeded {
            PaymentStatus::Succeeded
        } else {
            PaymentStatus::Failed
        };
        let to_status = if succeeded { OrderStatus::Paid } else { OrderStatus::Cancelled };

        let txn = self.db.begin().await?;
        let payment = self
            .payments
            .upsert_in_txn(
                &txn,
                order_id,
                "simulated",
                &provider_payment_id,
                order.total,
                &order.currency,
                payment_status,
            )
            .await?;

        let transition = self
            .orders
            .conditional_transition(&txn, order_id, OrderStatus::PaymentRequired, to_status)
            .await?;
        if transition != OrderTransition::Applied {
            // A concurrent sweep or redelivery already moved this order
            // past payment_required; the payment row we just wrote is
            // harmless (same upsert key, no row duplication) but the
            // order-side effects don't apply twice.
            txn.rollback().await?;
            info!(%order_id, "order transitioned concurrently, discarding payment outcome");
            return Ok(());
        }

        if succeeded {
            outbox::enqueue(&txn, &EventData::OrdersPaid { order_id }).await?;
            outbox::enqueue(
                &txn,
                &EventData::PaymentsSucceeded { order_id, payment_id: payment.id },
            )
            .await?;
        } else {
            outbox::enqueue(
                &txn,
                &EventData::OrdersCancelled {
                    order_id,
                    reason: "payment_failed".to_string(),
                },
            )
            .await?;
            outbox::enqueue(
                &txn,
                &EventData::PaymentsFailed {
                    order_id,
                    payment_id: payment.id,
                    reason: "payment_failed".to_string(),
                },
            )
            .await?;
        }
        txn.commit().await?;

        let outcome_label = if succeeded { "succeeded" } else { "failed" };
        self.metrics.payments_total.with_label_values(&[outcome_label]).inc();
        info!(%order_id, outcome = outcome_label, "payment processed");
        Ok(())
    }
}
