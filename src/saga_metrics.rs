//! Prometheus counters/gauges for the saga, following the
//! `prometheus::{IntCounter, IntCounterVec, Opts}` usage pattern seen
//! elsewhere in this codebase's inventory command layer, but
//! registered on an owned `Registry` threaded through `AppState` rather
//! than `lazy_static` globals, so tests can construct an isolated
//! `SagaMetrics` per case instead of sharing process-wide statics.
//!
//! Named `saga_metrics` rather than `metrics` so it doesn't shadow the
//! `metrics` facade crate `db.rs` uses for its own counter!/gauge! calls.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct SagaMetrics {
    registry: Registry,

    pub reservation_attempts_total: IntCounter,
    pub reservation_success_total: IntCounter,
    pub reservation_out_of_stock_total: IntCounter,

    pub sweep_cancellations_total: IntCounter,
    pub sweep_ticks_total: IntCounter,

    pub payments_total: IntCounterVec,
    pub dedup_hits_total: IntCounterVec,

    pub live_reservation_leases: IntGauge,

    pub outbox_published_total: IntCounter,
    pub outbox_publish_failures_total: IntCounter,

    pub db_retries_total: IntCounterVec,
}

impl SagaMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let reservation_attempts_total = IntCounter::with_opts(Opts::new(
            "saga_reservation_attempts_total",
            "Total inventory reservation attempts across all orders",
        ))
        .expect("metric can be created");
        let reservation_success_total = IntCounter::with_opts(Opts::new(
            "saga_reservation_success_total",
            "Total inventory reservations that succeeded",
        ))
        .expect("metric can be created");
        let reservation_out_of_stock_total = IntCounter::with_opts(Opts::new(
            "saga_reservation_out_of_stock_total",
            "Total inventory reservations that failed with out_of_stock",
        ))
        .expect("metric can be created");

        let sweep_cancellations_total = IntCounter::with_opts(Opts::new(
            "saga_sweep_cancellations_total",
            "Orders cancelled by the reservation expiry sweep",
        ))
        .expect("metric can be created");
        let sweep_ticks_total = IntCounter::with_opts(Opts::new(
            "saga_sweep_ticks_total",
            "Number of sweep loop passes executed",
        ))
        .expect("metric can be created");

        let payments_total = IntCounterVec::new(
            Opts::new(
                "saga_payments_total",
                "Simulated payment outcomes by result",
            ),
            &["outcome"],
        )
        .expect("metric can be created");

        let dedup_hits_total = IntCounterVec::new(
            Opts::new(
                "saga_dedup_hits_total",
                "Events recognized as already-processed by the dedup store",
            ),
            &["event_type"],
        )
        .expect("metric can be created");

        let live_reservation_leases = IntGauge::with_opts(Opts::new(
            "saga_live_reservation_leases",
            "Current count of open reservation leases",
        ))
        .expect("metric can be created");

        let outbox_published_total = IntCounter::with_opts(Opts::new(
            "saga_outbox_published_total",
            "Outbox rows successfully published to the event bus",
        ))
        .expect("metric can be created");
        let outbox_publish_failures_total = IntCounter::with_opts(Opts::new(
            "saga_outbox_publish_failures_total",
            "Outbox rows that failed to publish and were left pending for retry",
        ))
        .expect("metric can be created");

        let db_retries_total = IntCounterVec::new(
            Opts::new(
                "saga_db_retries_total",
                "Database operations retried after a transient error",
            ),
            &["operation"],
        )
        .expect("metric can be created");

        let metrics = Self {
            registry,
            reservation_attempts_total,
            reservation_success_total,
            reservation_out_of_stock_total,
            sweep_cancellations_total,
            sweep_ticks_total,
            payments_total,
            dedup_hits_total,
            live_reservation_leases,
            outbox_published_total,
            outbox_publish_failures_total,
            db_retries_total,
        };
        metrics.register_all();
        metrics
    }

    fn register_all(&self) {
        let r = &self.registry;
        r.register(Box::new(self.reservation_attempts_total.clone()))
            .expect("register reservation_attempts_total");
        r.register(Box::new(self.reservation_success_total.clone()))
            .expect("register reservation_success_total");
        r.register(Box::new(self.reservation_out_of_stock_total.clone()))
            .expect("register reservation_out_of_stock_total");
        r.register(Box::new(self.sweep_cancellations_total.clone()))
            .expect("register sweep_cancellations_total");
        r.register(Box::new(self.sweep_ticks_total.clone()))
            .expect("register sweep_ticks_total");
        r.register(Box::new(self.payments_total.clone()))
            .expect("register payments_total");
        r.register(Box::new(self.dedup_hits_total.clone()))
            .expect("register dedup_hits_total");
        r.register(Box::new(self.live_reservation_leases.clone()))
            .expect("register live_reservation_leases");
        r.register(Box::new(self.outbox_published_total.clone()))
            .expect("register outbox_published_total");
        r.register(Box::new(self.outbox_publish_failures_total.clone()))
            .expect("register outbox_publish_failures_total");
        r.register(Box::new(self.db_retries_total.clone()))
            .expect("register db_retries_total");
    }

    /// Renders every registered metric in Prometheus text exposition
    /// format, for the `/metrics` handler.
    pub fn render(&self) -> Result<String, std::fmt::Error> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder
            .encode(&families, &mut buf)
            .map_err(|_| std::fmt::Error)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}

impl Default for SagaMetrics {
    fn default() -> Self {
        Self::new()
    }
}
