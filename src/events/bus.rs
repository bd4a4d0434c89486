//! Event bus abstraction the saga components publish to and consume from.
//! The outbox relay is the only publisher; `OrderSubmit`, `InventoryWorker`
//! and `PaymentWorker` are topic consumers. Delivery is at-least-once —
//! consumers dedup via `ProcessedEventStore` and handlers are idempotent
//! regardless.

use crate::events::EventEnvelope;
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("queue full for topic {0}")]
    QueueFull(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("redis error: {0}")]
    Redis(String),
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<(), EventBusError>;
    /// Blocks until an event is available on `topic`.
    async fn receive(&self, topic: &str) -> Result<EventEnvelope, EventBusError>;
}

type Channel = (mpsc::Sender<EventEnvelope>, Arc<Mutex<mpsc::Receiver<EventEnvelope>>>);

/// In-process bus: one bounded mpsc channel per topic, created lazily. Fine
/// for tests and single-binary deployments where the outbox relay and the
/// workers share a process. The receiving half of each channel lives behind
/// its own `tokio::sync::Mutex` so a consumer can `.await` inside `recv()`
/// while holding that lock without blocking unrelated topics — the outer
/// `channels` map is only ever locked for the instant it takes to look up
/// or insert an entry.
pub struct InMemoryEventBus {
    channels: StdMutex<HashMap<String, Channel>>,
    capacity: usize,
}

impl InMemoryEventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: StdMutex::new(HashMap::new()),
            capacity,
        }
    }

    fn channel_for(&self, topic: &str) -> Channel {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(topic.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(self.capacity);
                (tx, Arc::new(Mutex::new(rx)))
            })
            .clone()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<(), EventBusError> {
        let (sender, _) = self.channel_for(topic);
        sender
            .send(envelope.clone())
            .await
            .map_err(|_| EventBusError::QueueFull(topic.to_string()))
    }

    async fn receive(&self, topic: &str) -> Result<EventEnvelope, EventBusError> {
        let (_, receiver) = self.channel_for(topic);
        let mut receiver = receiver.lock().await;
        receiver
            .recv()
            .await
            .ok_or_else(|| EventBusError::QueueFull(topic.to_string()))
    }
}

/// Redis-backed bus: `RPUSH` onto a namespaced list, `BLPOP` to consume.
/// Gives cross-process delivery when the saga components run as separate
/// binaries.
pub struct RedisEventBus {
    client: redis::Client,
    namespace: String,
}

impl RedisEventBus {
    pub fn new(redis_url: &str, namespace: String) -> Result<Self, EventBusError> {
        let client = redis::Client::open(redis_url).map_err(|e| EventBusError::Redis(e.to_string()))?;
        Ok(Self { client, namespace })
    }

    fn list_key(&self, topic: &str) -> String {
        format!("{}:{}", self.namespace, topic)
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<(), EventBusError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| EventBusError::Redis(e.to_string()))?;
        let payload = serde_json::to_string(envelope)?;
        conn.rpush::<_, _, ()>(self.list_key(topic), payload)
            .await
            .map_err(|e| EventBusError::Redis(e.to_string()))?;
        Ok(())
    }

    async fn receive(&self, topic: &str) -> Result<EventEnvelope, EventBusError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| EventBusError::Redis(e.to_string()))?;
        let (_, payload): (String, String) = conn
            .blpop(self.list_key(topic), 0.0)
            .await
            .map_err(|e| EventBusError::Redis(e.to_string()))?;
        Ok(serde_json::from_str(&payload)?)
    }
}
