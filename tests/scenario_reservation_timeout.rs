//! Scenario D: a 2s reservation TTL with no payment worker running.
//! After the TTL plus one sweep tick, the expiry sweep must cancel the
//! order and release the stock on its own — the sweep is a peer loop to
//! the consumers, not nested inside one.

mod common;

use common::{Harness, TestDb};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use std::time::Duration;
use stateset_saga::entities::order::OrderStatus;
use stateset_saga::entities::{inventory, inventory_adjustment_entity, payment};
use stateset_saga::saga::{SubmitItem, SubmitRequest};

#[tokio::test]
async fn reservation_expiry_sweep_cancels_abandoned_order() {
    let test_db = TestDb::new().await;
    let harness = Harness::new(test_db.db.clone(), 2, 1, 1);
    // No payment worker: the reservation is never paid for, only ever
    // expires.
    harness.spawn_sweep(Duration::from_millis(300));

    let product_id = test_db.seed_product("SKU-TIMEOUT", dec!(20.00), 4).await;
    let user_id = test_db.seed_user().await;

    let order = harness
        .order_submit
        .submit(SubmitRequest {
            user_id,
            shipping_address_text: "1 Infinite Loop".to_string(),
            customer_notes: None,
            items: vec![SubmitItem { product_id, quantity: 1 }],
        })
        .await
        .expect("submit should succeed");

    // Let the reservation actually land before the clock starts mattering.
    harness.settle(Duration::from_millis(200)).await;
    let inv = inventory::Entity::find_by_id(product_id)
        .one(test_db.db.as_ref())
        .await
        .unwrap()
        .expect("inventory row exists");
    assert_eq!(inv.available, 3, "reservation should have been taken before expiry");

    // TTL (2s) + sweep tick margin, bounded by the scenario's 4s budget.
    harness.settle(Duration::from_millis(3000)).await;

    let order = harness
        .orders
        .find_by_id(order.id)
        .await
        .unwrap()
        .expect("order exists");
    assert_eq!(order.status, OrderStatus::Cancelled);

    let inv = inventory::Entity::find_by_id(product_id)
        .one(test_db.db.as_ref())
        .await
        .unwrap()
        .expect("inventory row exists");
    assert_eq!(inv.available, 4);
    assert_eq!(inv.reserved, 0);
    assert_eq!(inv.on_hand, 4);

    let adjustments = inventory_adjustment_entity::Entity::find()
        .all(test_db.db.as_ref())
        .await
        .unwrap();
    assert_eq!(adjustments.len(), 2, "one sale row, one return row");
    assert!(adjustments.iter().any(|a| a.adjustment_type == "sale"));
    assert!(adjustments.iter().any(|a| a.adjustment_type == "return"));

    let payments = payment::Entity::find()
        .all(test_db.db.as_ref())
        .await
        .unwrap();
    assert!(payments.is_empty(), "no payment worker ran, so no payment row");
}
