//! The oversell-guard invariant, as a property rather than two fixed-size
//! scenarios: for
//! any stock level S and any number of concurrent single-unit reservation
//! attempts N, exactly `min(N, S)` succeed, the rest fail `out_of_stock`,
//! and the final inventory row is exactly consistent with that count. This
//! generalizes Scenario B across the `(stock, attempts)` space instead
//! of fixing it at 25-vs-80.

mod common;

use common::TestDb;
use proptest::prelude::*;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use stateset_saga::entities::inventory;
use stateset_saga::entities::inventory_adjustment_entity;
use stateset_saga::repositories::inventory_repository::ReservationOutcome;
use stateset_saga::repositories::InventoryRepository;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

async fn run_case(stock: i32, attempts: usize) {
    let test_db = TestDb::new().await;
    let product_id = test_db.seed_product("SKU-PROP", dec!(1.00), stock).await;
    let inventory_repo = Arc::new(InventoryRepository::new(test_db.db.clone()));

    let successes = Arc::new(AtomicUsize::new(0));
    let out_of_stock = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::with_capacity(attempts);
    for _ in 0..attempts {
        let inventory_repo = inventory_repo.clone();
        let successes = successes.clone();
        let out_of_stock = out_of_stock.clone();
        handles.push(tokio::spawn(async move {
            let order_id = Uuid::new_v4();
            match inventory_repo
                .reserve_all(order_id, &[(product_id, 1)])
                .await
                .expect("reservation call should not error")
            {
                ReservationOutcome::Reserved => {
                    successes.fetch_add(1, Ordering::SeqCst);
                }
                ReservationOutcome::OutOfStock { .. } => {
                    out_of_stock.fetch_add(1, Ordering::SeqCst);
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let expected_successes = stock.max(0) as usize;
    let expected_successes = expected_successes.min(attempts);
    assert_eq!(successes.load(Ordering::SeqCst), expected_successes);
    assert_eq!(out_of_stock.load(Ordering::SeqCst), attempts - expected_successes);

    let inv = inventory::Entity::find_by_id(product_id)
        .one(test_db.db.as_ref())
        .await
        .unwrap()
        .expect("inventory row exists");
    assert_eq!(inv.available, stock - expected_successes as i32);
    assert_eq!(inv.reserved, expected_successes as i32);
    assert_eq!(inv.on_hand, stock);

    let adjustments = inventory_adjustment_entity::Entity::find()
        .filter(inventory_adjustment_entity::Column::ProductId.eq(product_id))
        .all(test_db.db.as_ref())
        .await
        .unwrap();
    assert_eq!(adjustments.len(), expected_successes);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn oversell_guard_holds_across_stock_and_attempt_counts(
        stock in 0i32..12,
        attempts in 0usize..20,
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(run_case(stock, attempts));
    }
}
