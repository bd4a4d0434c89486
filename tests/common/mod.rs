//! Shared test harness: a file-backed SQLite database (a true in-memory
//! `sqlite::memory:` DB is invisible across pooled connections, so tests
//! that exercise concurrent workers need a real file) with every migration
//! applied, plus a couple of seeding helpers the scenario tests reuse.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use stateset_saga::circuit_breaker::CircuitBreakerConfig;
use stateset_saga::db::{establish_connection_with_config, run_migrations, DbConfig};
use stateset_saga::entities::{inventory, product, user};
use stateset_saga::events::bus::{EventBus, InMemoryEventBus};
use stateset_saga::events::outbox::OutboxRelay;
use stateset_saga::kv::{ProcessedEventStore, ReservationLeaseStore};
use stateset_saga::repositories::{InventoryRepository, OrderRepository};
use stateset_saga::saga::{ExpirySweep, InventoryWorker, OrderSubmit, PaymentWorker};
use stateset_saga::saga_metrics::SagaMetrics;
use stateset_saga::cache::InMemoryCache;

pub struct TestDb {
    pub db: Arc<DatabaseConnection>,
    path: std::path::PathBuf,
}

impl TestDb {
    /// A fresh file-backed SQLite database with a small connection pool —
    /// large enough for a handful of concurrent workers to race on the
    /// same rows, which is the whole point of the oversell-guard tests.
    pub async fn new() -> Self {
        let mut path = std::env::temp_dir();
        path.push(format!("stateset-saga-test-{}.db", Uuid::new_v4()));

        let config = DbConfig {
            url: format!("sqlite://{}?mode=rwc", path.display()),
            max_connections: 8,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(5),
            statement_timeout: None,
        };

        let db = establish_connection_with_config(&config)
            .await
            .expect("failed to open test database");
        run_migrations(&db).await.expect("failed to run migrations");

        Self {
            db: Arc::new(db),
            path,
        }
    }

    /// Inserts an active product and its inventory row with `on_hand`
    /// units fully available, returning the product id.
    pub async fn seed_product(&self, sku: &str, price: Decimal, on_hand: i32) -> Uuid {
        let product_id = Uuid::new_v4();
        let now = Utc::now();

        product::ActiveModel {
            id: Set(product_id),
            sku: Set(sku.to_string()),
            name: Set(format!("test product {}", sku)),
            price: Set(price),
            is_active: Set(true),
            deleted_at: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(self.db.as_ref())
        .await
        .expect("insert product");

        inventory::ActiveModel {
            product_id: Set(product_id),
            available: Set(on_hand),
            reserved: Set(0),
            on_hand: Set(on_hand),
            low_stock_threshold: Set(5),
            updated_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await
        .expect("insert inventory");

        product_id
    }

    /// Inserts a customer row so order submissions have a real
    /// `users.id` to satisfy the `orders.user_id` foreign key, returning
    /// the new user's id.
    pub async fn seed_user(&self) -> Uuid {
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        user::ActiveModel {
            id: Set(user_id),
            email: Set(format!("{}@example.test", user_id)),
            name: Set("test user".to_string()),
            password_hash: Set("not-a-real-hash".to_string()),
            role: Set("customer".to_string()),
            deleted_at: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(self.db.as_ref())
        .await
        .expect("insert user");

        user_id
    }
}

impl Drop for TestDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Everything that needs to agree on the same DB, bus and KV backend to
/// exercise the saga end to end. `OrderSubmit` stays a direct call (it is
/// synchronous in production too); the outbox relay and `InventoryWorker`
/// are always running in the background the moment a `Harness` exists,
/// since every scenario needs its `orders.created`/`orders.paid`/
/// `orders.cancelled` handling. `PaymentWorker` and `ExpirySweep` are
/// opt-in per test via `spawn_payment_worker`/`spawn_sweep`, so a scenario
/// like the reservation-timeout one (Scenario D) can hold a reservation
/// open without anything paying for it.
pub struct Harness {
    pub order_submit: Arc<OrderSubmit>,
    pub orders: Arc<OrderRepository>,
    pub inventory: Arc<InventoryRepository>,
    pub inventory_worker: Arc<InventoryWorker>,
    pub payment_worker: Arc<PaymentWorker>,
    pub sweep: Arc<ExpirySweep>,
    pub outbox_relay: Arc<OutboxRelay>,
    pub bus: Arc<dyn EventBus>,
    shutdown_rx: watch::Receiver<bool>,
    _shutdown_tx: watch::Sender<bool>,
}

impl Harness {
    /// `success_numerator`/`success_denominator` mirror
    /// `payment_simulator::decide`'s ratio — pass `(1, 1)` for an
    /// always-succeeds payment outcome, or `(0, 1)` for an always-declines
    /// one.
    pub fn new(
        db: Arc<DatabaseConnection>,
        reservation_ttl_secs: u64,
        success_numerator: i64,
        success_denominator: i64,
    ) -> Self {
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new(256));
        let cache = Arc::new(InMemoryCache::new());
        let breaker_config = CircuitBreakerConfig {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 2,
        };
        let leases = Arc::new(ReservationLeaseStore::new(
            cache.clone(),
            breaker_config.clone(),
            Duration::from_secs(reservation_ttl_secs),
        ));
        let processed = Arc::new(ProcessedEventStore::new(
            cache,
            breaker_config,
            Duration::from_secs(300),
        ));
        let metrics = Arc::new(SagaMetrics::new());

        let order_submit = Arc::new(OrderSubmit::new(db.clone(), reservation_ttl_secs));
        let orders = Arc::new(OrderRepository::new(db.clone()));
        let inventory = Arc::new(InventoryRepository::new(db.clone()));

        let inventory_worker = Arc::new(InventoryWorker::new(
            db.clone(),
            bus.clone(),
            leases.clone(),
            processed.clone(),
            metrics.clone(),
        ));
        let payment_worker = Arc::new(PaymentWorker::new(
            db.clone(),
            bus.clone(),
            leases.clone(),
            processed.clone(),
            metrics.clone(),
            success_numerator,
            success_denominator,
        ));
        let sweep = Arc::new(ExpirySweep::new(db.clone(), leases, metrics));
        let outbox_relay = Arc::new(OutboxRelay::new(db, bus.clone(), Duration::from_millis(20)));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(inventory_worker.clone().run(shutdown_rx.clone()));
        tokio::spawn({
            let relay = outbox_relay.clone();
            let rx = shutdown_rx.clone();
            async move { relay.run(rx).await }
        });

        Self {
            order_submit,
            orders,
            inventory,
            inventory_worker,
            payment_worker,
            sweep,
            outbox_relay,
            bus,
            shutdown_rx,
            _shutdown_tx: shutdown_tx,
        }
    }

    /// Starts `PaymentWorker`'s consumer loop in the background. Not
    /// started by default so a test can let a reservation sit unpaid.
    pub fn spawn_payment_worker(&self) {
        tokio::spawn(self.payment_worker.clone().run(self.shutdown_rx.clone()));
    }

    /// Starts the expiry sweep ticking at `interval`. Not started by
    /// default since most scenarios use a long reservation TTL the sweep
    /// would never need to act on within a test's lifetime.
    pub fn spawn_sweep(&self, interval: Duration) {
        tokio::spawn(self.sweep.clone().run(interval, self.shutdown_rx.clone()));
    }

    /// Lets the background consumer loops and outbox relay drain whatever
    /// work is currently pending. All the "workers" here are real
    /// `tokio::spawn`ed tasks reacting to the in-memory bus, so this is
    /// just giving them scheduler time, not polling anything directly.
    pub async fn settle(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Older name for [`Harness::settle`], kept for scenario tests that
    /// think in terms of discrete rounds rather than a duration.
    pub async fn drain_to_quiescence(&self, rounds: usize) {
        self.settle(Duration::from_millis(20) * rounds as u32).await;
    }
}
