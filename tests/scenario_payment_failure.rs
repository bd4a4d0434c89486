//! Scenario C: the reservation succeeds but the simulated payment
//! declines. The order must land on `cancelled{reason="payment_failed"}`,
//! a `payments.failed` row exists, and the held stock is fully released.

mod common;

use common::{Harness, TestDb};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use stateset_saga::entities::order::OrderStatus;
use stateset_saga::entities::payment::PaymentStatus;
use stateset_saga::entities::{inventory, payment};
use stateset_saga::saga::{SubmitItem, SubmitRequest};

#[tokio::test]
async fn payment_failure_releases_reservation_and_cancels_order() {
    let test_db = TestDb::new().await;
    // success_numerator = 0 makes payment_simulator::decide always decline.
    let harness = Harness::new(test_db.db.clone(), 600, 0, 1);
    harness.spawn_payment_worker();

    let product_id = test_db.seed_product("SKU-DECLINE", dec!(15.00), 5).await;
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

    harness.drain_to_quiescence(10).await;

    let order = harness
        .orders
        .find_by_id(order.id)
        .await
        .unwrap()
        .expect("order exists");
    assert_eq!(order.status, OrderStatus::Cancelled);

    let payments = payment::Entity::find()
        .all(test_db.db.as_ref())
        .await
        .unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Failed);

    let inv = inventory::Entity::find_by_id(product_id)
        .one(test_db.db.as_ref())
        .await
        .unwrap()
        .expect("inventory row exists");
    assert_eq!(inv.available, 5);
    assert_eq!(inv.reserved, 0);
    assert_eq!(inv.on_hand, 5);
}
