//! Process entry point: wires the HTTP surface and the four saga
//! background tasks (`InventoryWorker`, `PaymentWorker`, `ExpirySweep`,
//! `OutboxRelay`) into one binary and drives them to a coordinated
//! shutdown on Ctrl-C.

use axum::http::{HeaderValue, Method};
use axum::response::{IntoResponse, Json};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{middleware, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use stateset_saga::auth::auth_middleware;
use stateset_saga::cache::build_cache_backend;
use stateset_saga::circuit_breaker::CircuitBreakerConfig;
use stateset_saga::config::{self, AppConfig};
use stateset_saga::db::{self, establish_connection_from_app_config};
use stateset_saga::events::bus::{EventBus, InMemoryEventBus, RedisEventBus};
use stateset_saga::events::outbox::OutboxRelay;
use stateset_saga::handlers::orders::{self, OrdersState};
use stateset_saga::health;
use stateset_saga::kv::{ProcessedEventStore, ReservationLeaseStore};
use stateset_saga::repositories::OrderRepository;
use stateset_saga::saga::{ExpirySweep, InventoryWorker, OrderSubmit, PaymentWorker};
use stateset_saga::saga_metrics::SagaMetrics;

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" })))
}

async fn metrics_endpoint(
    axum::extract::State(metrics): axum::extract::State<Arc<SagaMetrics>>,
) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to render metrics".to_string(),
        ),
    }
}

fn build_cors_layer(config: &AppConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any);

    if config.should_allow_permissive_cors() {
        return layer.allow_origin(tower_http::cors::Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();

    layer
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(config.cors_allow_credentials)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = config::load_config()?;
    config::init_tracing(&config.log_level, config.log_json);

    info!("stateset-saga starting");

    let db = establish_connection_from_app_config(&config).await?;
    let db = Arc::new(db);

    if config.auto_migrate {
        info!("running pending migrations");
        db::run_migrations(&db).await?;
    }

    let cache = build_cache_backend(&config.cache.cache_type, &config.redis_url).await;

    let bus: Arc<dyn EventBus> = if config.message_queue_backend.eq_ignore_ascii_case("redis") {
        match RedisEventBus::new(&config.redis_url, config.message_queue_namespace.clone()) {
            Ok(bus) => {
                info!("using redis event bus");
                Arc::new(bus)
            }
            Err(e) => {
                error!(error = %e, "failed to construct redis event bus, falling back to in-memory");
                Arc::new(InMemoryEventBus::new(config.event_channel_capacity))
            }
        }
    } else {
        info!("using in-memory event bus");
        Arc::new(InMemoryEventBus::new(config.event_channel_capacity))
    };

    let breaker_config = CircuitBreakerConfig {
        failure_threshold: config.circuit_breaker_failure_threshold,
        timeout: Duration::from_secs(config.circuit_breaker_timeout_secs),
        success_threshold: 2,
    };

    let leases = Arc::new(ReservationLeaseStore::new(
        cache.clone(),
        breaker_config.clone(),
        Duration::from_secs(config.reservation_ttl_secs),
    ));
    let processed = Arc::new(ProcessedEventStore::new(
        cache.clone(),
        breaker_config,
        Duration::from_secs(config.processed_event_ttl_secs),
    ));

    let metrics = Arc::new(SagaMetrics::new());

    let order_submit = Arc::new(OrderSubmit::new(db.clone(), config.reservation_ttl_secs));
    let orders_repo = Arc::new(OrderRepository::new(db.clone()));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

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
        config.payment_success_numerator,
        config.payment_success_denominator,
    ));
    let sweep = Arc::new(ExpirySweep::new(db.clone(), leases.clone(), metrics.clone()));
    let outbox_relay = Arc::new(OutboxRelay::new(
        db.clone(),
        bus.clone(),
        Duration::from_secs(config.outbox_poll_interval_secs),
    ));

    let inventory_handle = tokio::spawn(inventory_worker.run(shutdown_rx.clone()));
    let payment_handle = tokio::spawn(payment_worker.run(shutdown_rx.clone()));
    let sweep_handle = tokio::spawn(
        sweep.run(
            Duration::from_secs(config.sweep_interval_secs),
            shutdown_rx.clone(),
        ),
    );
    let outbox_handle = {
        let relay = outbox_relay.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { relay.run(rx).await })
    };

    let config = Arc::new(config);

    let orders_state = OrdersState {
        order_submit,
        orders: orders_repo,
    };

    let health_router = health::health_routes_with_state(db.clone(), cache.clone());
    let metrics_router = Router::new()
        .route("/metrics", get(metrics_endpoint))
        .with_state(metrics.clone());
    let orders_router = orders::routes(orders_state)
        .layer(middleware::from_fn_with_state(config.clone(), auth_middleware));

    let app = Router::new()
        .nest("/health", health_router)
        .nest("/api/orders", orders_router)
        .merge(metrics_router)
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors_layer(&config)),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, draining saga workers");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = tokio::join!(inventory_handle, payment_handle, sweep_handle, outbox_handle);
    info!("stateset-saga stopped");
    Ok(())
}
