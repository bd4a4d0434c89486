//! Scenario A: a single order for in-stock quantity flows all the
//! way to `paid`, inventory lands on the exact post-sale numbers, and the
//! expected event sequence fires exactly once.

mod common;

use common::{Harness, TestDb};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use stateset_saga::entities::order::OrderStatus;
use stateset_saga::entities::payment::PaymentStatus;
use stateset_saga::entities::{inventory, inventory_adjustment_entity, payment};
use stateset_saga::saga::{SubmitItem, SubmitRequest};

#[tokio::test]
async fn happy_path_reaches_paid_with_correct_inventory() {
    let test_db = TestDb::new().await;
    // success_numerator == success_denominator makes payment_simulator::decide always succeed.
    let harness = Harness::new(test_db.db.clone(), 600, 1, 1);
    harness.spawn_payment_worker();

    let product_id = test_db.seed_product("SKU-HAPPY", dec!(100.00), 10).await;
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
    assert_eq!(order.status, OrderStatus::PaymentRequired);

    harness.drain_to_quiescence(10).await;

    let order = harness
        .orders
        .find_by_id(order.id)
        .await
        .unwrap()
        .expect("order exists");
    assert_eq!(order.status, OrderStatus::Paid);

    let inv = inventory::Entity::find_by_id(product_id)
        .one(test_db.db.as_ref())
        .await
        .unwrap()
        .expect("inventory row exists");
    assert_eq!(inv.available, 9);
    assert_eq!(inv.reserved, 0);
    assert_eq!(inv.on_hand, 9);

    let payments = payment::Entity::find()
        .all(test_db.db.as_ref())
        .await
        .unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Succeeded);
    assert_eq!(payments[0].order_id, order.id);

    let adjustments = inventory_adjustment_entity::Entity::find()
        .all(test_db.db.as_ref())
        .await
        .unwrap();
    assert_eq!(adjustments.len(), 1);
    assert_eq!(adjustments[0].adjustment_type, "sale");
}
