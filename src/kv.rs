//! Advisory coordination on top of the KV backend: reservation leases and
//! processed-event dedup keys. Both are optimizations, not the correctness
//! backbone (the DB's conditional UPDATEs are) — so every call here is
//! gated by a circuit breaker and fails open on error rather than blocking
//! the saga. A KV outage degrades the sweep loop to relying solely on the
//! DB-side `available_at`/expiry bookkeeping, and degrades dedup to
//! allowing a harmless re-application of an idempotent handler.

use crate::cache::CacheBackend;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct ReservationLeaseStore {
    backend: Arc<dyn CacheBackend>,
    breaker: Arc<CircuitBreaker>,
    ttl: Duration,
}

impl ReservationLeaseStore {
    pub fn new(backend: Arc<dyn CacheBackend>, breaker_config: CircuitBreakerConfig, ttl: Duration) -> Self {
        Self {
            backend,
            breaker: Arc::new(CircuitBreaker::with_config(breaker_config)),
            ttl,
        }
    }

    fn key(order_id: Uuid) -> String {
        format!("reservation:order:{}", order_id)
    }

    /// Best-effort marker that a reservation is in flight for `order_id`.
    /// Returns `true` normally; on a KV failure it fails open and also
    /// returns `true` so the caller proceeds to the DB-backed reservation,
    /// which remains correct with or without this marker.
    pub async fn acquire(&self, order_id: Uuid) -> bool {
        if matches!(self.breaker.state(), crate::circuit_breaker::CircuitState::Open) {
            tracing::warn!(%order_id, "reservation lease store circuit open, failing open");
            return true;
        }
        let key = Self::key(order_id);
        match self.backend.set_if_absent(&key, "1", self.ttl).await {
            Ok(acquired) => {
                let _ = self.breaker.call(|| Ok::<(), ()>(())).await;
                acquired
            }
            Err(e) => {
                tracing::warn!(%order_id, error = %e, "reservation lease acquire failed, failing open");
                let _ = self.breaker.call(|| Err::<(), _>(e)).await;
                true
            }
        }
    }

    pub async fn release(&self, order_id: Uuid) {
        let key = Self::key(order_id);
        if let Err(e) = self.backend.delete(&key).await {
            tracing::warn!(%order_id, error = %e, "reservation lease release failed");
        }
    }

    /// Re-verification step before `PaymentWorker` finalizes a reservation
    /// a missing lease on a live backend is a signal the sweep loop
    /// may already have released this order's stock, so the caller should
    /// re-check the order's DB status before trusting the payment event. A
    /// KV failure fails open (`true`) — the conditional DB transition
    /// remains the actual correctness guard either way.
    pub async fn exists(&self, order_id: Uuid) -> bool {
        if matches!(self.breaker.state(), crate::circuit_breaker::CircuitState::Open) {
            tracing::warn!(%order_id, "reservation lease store circuit open, failing open");
            return true;
        }
        let key = Self::key(order_id);
        match self.backend.exists(&key).await {
            Ok(exists) => {
                let _ = self.breaker.call(|| Ok::<(), ()>(())).await;
                exists
            }
            Err(e) => {
                tracing::warn!(%order_id, error = %e, "reservation lease exists check failed, failing open");
                let _ = self.breaker.call(|| Err::<(), _>(e)).await;
                true
            }
        }
    }
}

pub struct ProcessedEventStore {
    backend: Arc<dyn CacheBackend>,
    breaker: Arc<CircuitBreaker>,
    ttl: Duration,
}

impl ProcessedEventStore {
    pub fn new(backend: Arc<dyn CacheBackend>, breaker_config: CircuitBreakerConfig, ttl: Duration) -> Self {
        Self {
            backend,
            breaker: Arc::new(CircuitBreaker::with_config(breaker_config)),
            ttl,
        }
    }

    /// `processed:event:<hash(eventID)>` — hashed rather than the raw
    /// UUID so the key shape matches other deployments of this store that
    /// dedup on non-UUID event ids (e.g. provider webhook ids) without a
    /// format split.
    fn key(event_id: Uuid) -> String {
        let digest = Sha256::digest(event_id.as_bytes());
        format!("processed:event:{}", hex::encode(digest))
    }

    /// Returns `true` if this is the first time `event_id` has been seen
    /// (the caller should process it). On a KV failure this fails open by
    /// returning `true` — handlers downstream must still be idempotent,
    /// since at-least-once delivery is the guarantee this store only
    /// optimizes, never substitutes for.
    pub async fn mark_processed(&self, event_id: Uuid) -> bool {
        if matches!(self.breaker.state(), crate::circuit_breaker::CircuitState::Open) {
            tracing::warn!(%event_id, "processed-event store circuit open, failing open");
            return true;
        }
        let key = Self::key(event_id);
        match self.backend.set_if_absent(&key, "1", self.ttl).await {
            Ok(first_seen) => {
                let _ = self.breaker.call(|| Ok::<(), ()>(())).await;
                first_seen
            }
            Err(e) => {
                tracing::warn!(%event_id, error = %e, "dedup check failed, failing open");
                let _ = self.breaker.call(|| Err::<(), _>(e)).await;
                true
            }
        }
    }
}
