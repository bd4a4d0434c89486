//! The saga's event vocabulary. Every event that crosses `OrderSubmit`,
//! `InventoryWorker` and `PaymentWorker` is one of these variants, wrapped
//! in an `EventEnvelope` that carries the identifiers a consumer needs for
//! idempotent handling (`event_id` for dedup, `order_id` for routing)
//! independent of the payload shape.

pub mod bus;
pub mod outbox;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderItemPayload {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data")]
pub enum EventData {
    OrdersCreated {
        order_id: Uuid,
        user_id: Uuid,
        items: Vec<OrderItemPayload>,
        total: Decimal,
        currency: String,
    },
    OrdersPaid {
        order_id: Uuid,
    },
    OrdersCancelled {
        order_id: Uuid,
        reason: String,
    },
    InventoryReserved {
        order_id: Uuid,
    },
    InventoryReservationFailed {
        order_id: Uuid,
        product_id: Uuid,
        reason: String,
    },
    InventoryReleased {
        order_id: Uuid,
        reason: String,
    },
    PaymentsSucceeded {
        order_id: Uuid,
        payment_id: Uuid,
    },
    PaymentsFailed {
        order_id: Uuid,
        payment_id: Uuid,
        reason: String,
    },
}

impl EventData {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventData::OrdersCreated { .. } => "OrdersCreated",
            EventData::OrdersPaid { .. } => "OrdersPaid",
            EventData::OrdersCancelled { .. } => "OrdersCancelled",
            EventData::InventoryReserved { .. } => "InventoryReserved",
            EventData::InventoryReservationFailed { .. } => "InventoryReservationFailed",
            EventData::InventoryReleased { .. } => "InventoryReleased",
            EventData::PaymentsSucceeded { .. } => "PaymentsSucceeded",
            EventData::PaymentsFailed { .. } => "PaymentsFailed",
        }
    }

    pub fn aggregate_type(&self) -> &'static str {
        match self {
            EventData::OrdersCreated { .. }
            | EventData::OrdersPaid { .. }
            | EventData::OrdersCancelled { .. } => "order",
            EventData::InventoryReserved { .. }
            | EventData::InventoryReservationFailed { .. }
            | EventData::InventoryReleased { .. } => "inventory",
            EventData::PaymentsSucceeded { .. } | EventData::PaymentsFailed { .. } => "payment",
        }
    }

    pub fn order_id(&self) -> Uuid {
        match self {
            EventData::OrdersCreated { order_id, .. }
            | EventData::OrdersPaid { order_id }
            | EventData::OrdersCancelled { order_id, .. }
            | EventData::InventoryReserved { order_id }
            | EventData::InventoryReservationFailed { order_id, .. }
            | EventData::InventoryReleased { order_id, .. }
            | EventData::PaymentsSucceeded { order_id, .. }
            | EventData::PaymentsFailed { order_id, .. } => *order_id,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub data: EventData,
}

impl EventEnvelope {
    pub fn new(data: EventData) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            data,
        }
    }
}
