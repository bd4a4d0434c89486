//! Round-trip and idempotence properties that don't need the full saga
//! running: envelope marshal/unmarshal identity, and the conditional
//! status-transition primitive's compare-and-set semantics.

mod common;

use chrono::Utc;
use common::TestDb;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use stateset_saga::entities::order::OrderStatus;
use stateset_saga::events::{EventData, EventEnvelope, OrderItemPayload};
use sea_orm::{ActiveModelTrait, Set, TransactionTrait};
use stateset_saga::entities::user;
use stateset_saga::repositories::order_repository::{NewOrder, NewOrderItem};
use stateset_saga::repositories::{OrderRepository, OrderTransition};
use uuid::Uuid;

fn all_event_variants() -> Vec<EventData> {
    let order_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let product_id = Uuid::new_v4();
    let payment_id = Uuid::new_v4();
    vec![
        EventData::OrdersCreated {
            order_id,
            user_id,
            items: vec![OrderItemPayload { product_id, quantity: 2 }],
            total: dec!(59.98),
            currency: "USD".to_string(),
        },
        EventData::OrdersPaid { order_id },
        EventData::OrdersCancelled { order_id, reason: "payment_failed".to_string() },
        EventData::InventoryReserved { order_id },
        EventData::InventoryReservationFailed {
            order_id,
            product_id,
            reason: "out_of_stock".to_string(),
        },
        EventData::InventoryReleased { order_id, reason: "reservation_expired".to_string() },
        EventData::PaymentsSucceeded { order_id, payment_id },
        EventData::PaymentsFailed {
            order_id,
            payment_id,
            reason: "payment_failed".to_string(),
        },
    ]
}

#[test]
fn envelope_marshal_unmarshal_is_identity_for_every_payload() {
    for data in all_event_variants() {
        let envelope = EventEnvelope::new(data);
        let json = serde_json::to_string(&envelope).expect("envelope serializes");
        let decoded: EventEnvelope = serde_json::from_str(&json).expect("envelope deserializes");

        assert_eq!(decoded.event_id, envelope.event_id);
        assert_eq!(decoded.data.order_id(), envelope.data.order_id());
        assert_eq!(decoded.data.event_type(), envelope.data.event_type());
        assert_eq!(decoded.data.aggregate_type(), envelope.data.aggregate_type());

        // Re-serializing the decoded value reproduces the same JSON,
        // confirming no field was silently dropped or defaulted.
        let rejson = serde_json::to_string(&decoded).unwrap();
        assert_eq!(json, rejson);
    }
}

async fn seed_bare_order(db: &std::sync::Arc<sea_orm::DatabaseConnection>) -> Uuid {
    let orders = OrderRepository::new(db.clone());
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
    .insert(db.as_ref())
    .await
    .unwrap();

    let txn = db.begin().await.unwrap();
    let order = orders
        .create_in_txn(
            &txn,
            NewOrder {
                user_id,
                shipping_address_text: "1 Infinite Loop".to_string(),
                customer_notes: None,
                currency: "USD".to_string(),
                subtotal: Decimal::ZERO,
                tax: Decimal::ZERO,
                total: Decimal::ZERO,
                items: vec![NewOrderItem {
                    product_id: Uuid::new_v4(),
                    product_name: "widget".to_string(),
                    product_sku: "SKU-IDEMP".to_string(),
                    quantity: 1,
                    unit_price: Decimal::ZERO,
                }],
                reservation_expires_at: Utc::now(),
            },
        )
        .await
        .unwrap();
    txn.commit().await.unwrap();
    order.id
}

#[tokio::test]
async fn conditional_transition_applies_exactly_once() {
    let test_db = TestDb::new().await;
    let orders = OrderRepository::new(test_db.db.clone());
    let order_id = seed_bare_order(&test_db.db).await;

    let first = orders
        .conditional_transition(test_db.db.as_ref(), order_id, OrderStatus::PaymentRequired, OrderStatus::Paid)
        .await
        .unwrap();
    assert_eq!(first, OrderTransition::Applied);

    let second = orders
        .conditional_transition(test_db.db.as_ref(), order_id, OrderStatus::PaymentRequired, OrderStatus::Paid)
        .await
        .unwrap();
    assert_eq!(second, OrderTransition::NotApplied, "repeated application after success is a no-op");

    let order = orders.find_by_id(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
}

#[tokio::test]
async fn conditional_transition_cannot_move_a_terminal_order_to_a_different_terminal_state() {
    let test_db = TestDb::new().await;
    let orders = OrderRepository::new(test_db.db.clone());
    let order_id = seed_bare_order(&test_db.db).await;

    let to_paid = orders
        .conditional_transition(test_db.db.as_ref(), order_id, OrderStatus::PaymentRequired, OrderStatus::Paid)
        .await
        .unwrap();
    assert_eq!(to_paid, OrderTransition::Applied);

    // A concurrent cancellation attempt (e.g. a racing sweep) finds the
    // order no longer in `payment_required` and cannot apply.
    let to_cancelled = orders
        .conditional_transition(test_db.db.as_ref(), order_id, OrderStatus::PaymentRequired, OrderStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(to_cancelled, OrderTransition::NotApplied);

    let order = orders.find_by_id(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid, "the winning transition is the only one that sticks");
}
