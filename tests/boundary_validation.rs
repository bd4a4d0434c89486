//! Boundary behaviors for `OrderSubmit` that don't need the rest of the
//! saga running: quantity validation, missing/inactive products, and the
//! dedupe-then-sum collapse of repeated product ids within one request.

mod common;

use common::{Harness, TestDb};
use rust_decimal_macros::dec;
use stateset_saga::errors::ServiceError;
use stateset_saga::saga::{SubmitItem, SubmitRequest};
use uuid::Uuid;

fn request(user_id: Uuid, items: Vec<SubmitItem>) -> SubmitRequest {
    SubmitRequest {
        user_id,
        shipping_address_text: "1 Infinite Loop".to_string(),
        customer_notes: None,
        items,
    }
}

#[tokio::test]
async fn empty_item_list_is_rejected() {
    let test_db = TestDb::new().await;
    let harness = Harness::new(test_db.db.clone(), 600, 1, 1);
    let user_id = test_db.seed_user().await;

    let result = harness.order_submit.submit(request(user_id, vec![])).await;
    assert!(matches!(result, Err(ServiceError::Validation(msg)) if msg == "invalid_items"));
}

#[tokio::test]
async fn zero_quantity_is_rejected() {
    let test_db = TestDb::new().await;
    let harness = Harness::new(test_db.db.clone(), 600, 1, 1);
    let user_id = test_db.seed_user().await;
    let product_id = test_db.seed_product("SKU-ZERO", dec!(10.00), 5).await;

    let result = harness
        .order_submit
        .submit(request(user_id, vec![SubmitItem { product_id, quantity: 0 }]))
        .await;
    assert!(matches!(result, Err(ServiceError::Validation(msg)) if msg == "invalid_items"));
}

#[tokio::test]
async fn negative_quantity_is_rejected() {
    let test_db = TestDb::new().await;
    let harness = Harness::new(test_db.db.clone(), 600, 1, 1);
    let user_id = test_db.seed_user().await;
    let product_id = test_db.seed_product("SKU-NEG", dec!(10.00), 5).await;

    let result = harness
        .order_submit
        .submit(request(user_id, vec![SubmitItem { product_id, quantity: -1 }]))
        .await;
    assert!(matches!(result, Err(ServiceError::Validation(msg)) if msg == "invalid_items"));
}

#[tokio::test]
async fn blank_shipping_address_is_rejected() {
    let test_db = TestDb::new().await;
    let harness = Harness::new(test_db.db.clone(), 600, 1, 1);
    let user_id = test_db.seed_user().await;
    let product_id = test_db.seed_product("SKU-ADDR", dec!(10.00), 5).await;

    let mut req = request(user_id, vec![SubmitItem { product_id, quantity: 1 }]);
    req.shipping_address_text = "   ".to_string();
    let result = harness.order_submit.submit(req).await;
    assert!(matches!(result, Err(ServiceError::Validation(msg)) if msg == "shipping_address_required"));
}

#[tokio::test]
async fn unknown_product_id_fails_whole_request() {
    let test_db = TestDb::new().await;
    let harness = Harness::new(test_db.db.clone(), 600, 1, 1);
    let user_id = test_db.seed_user().await;
    let known = test_db.seed_product("SKU-KNOWN", dec!(10.00), 5).await;
    let unknown = Uuid::new_v4();

    let result = harness
        .order_submit
        .submit(request(user_id, vec![
            SubmitItem { product_id: known, quantity: 1 },
            SubmitItem { product_id: unknown, quantity: 1 },
        ]))
        .await;
    assert!(matches!(result, Err(ServiceError::Validation(msg)) if msg == "product_not_found"));
}

#[tokio::test]
async fn duplicate_product_ids_collapse_into_one_line_with_summed_quantity() {
    let test_db = TestDb::new().await;
    let harness = Harness::new(test_db.db.clone(), 600, 1, 1);
    let user_id = test_db.seed_user().await;
    let product_id = test_db.seed_product("SKU-DUP", dec!(10.00), 5).await;

    let order = harness
        .order_submit
        .submit(request(user_id, vec![
            SubmitItem { product_id, quantity: 2 },
            SubmitItem { product_id, quantity: 3 },
        ]))
        .await
        .expect("submit should succeed");

    let items = harness.orders.find_items(order.id).await.unwrap();
    assert_eq!(items.len(), 1, "duplicate product_ids collapse to one order_items row");
    assert_eq!(items[0].quantity, 5, "quantities across duplicate lines are summed");
    assert_eq!(order.subtotal, dec!(50.00));
    assert_eq!(order.total, dec!(50.00));
    assert_eq!(order.tax, dec!(0));
}
