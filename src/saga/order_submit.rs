//! OrderSubmit: the synchronous entry point invoked from the HTTP layer.
//! Everything here runs in one relational transaction, including the
//! outbox row, so a successful `submit()` call leaves the order row and
//! its `orders.created` event in exact agreement — the relay delivers it
//! independent of whether the bus happened to be reachable at request
//! time.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, TransactionTrait};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::order;
use crate::errors::ServiceError;
use crate::events::outbox;
use crate::events::{EventData, OrderItemPayload};
use crate::repositories::order_repository::{NewOrder, NewOrderItem};
use crate::repositories::{OrderRepository, ProductRepository};

/// One line of an incoming submit request, pre-validation.
#[derive(Clone, Debug)]
pub struct SubmitItem {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Clone, Debug)]
pub struct SubmitRequest {
    pub user_id: Uuid,
    pub shipping_address_text: String,
    pub customer_notes: Option<String>,
    pub items: Vec<SubmitItem>,
}

pub struct OrderSubmit {
    db: Arc<DatabaseConnection>,
    orders: OrderRepository,
    products: ProductRepository,
    reservation_ttl_secs: u64,
}

impl OrderSubmit {
    pub fn new(db: Arc<DatabaseConnection>, reservation_ttl_secs: u64) -> Self {
        Self {
            orders: OrderRepository::new(db.clone()),
            products: ProductRepository::new(db.clone()),
            db,
            reservation_ttl_secs,
        }
    }

    /// Validation failures return before any row is
    /// touched; once the transaction opens, either everything commits
    /// (order, items, outbox row) or nothing does.
    pub async fn submit(&self, req: SubmitRequest) -> Result<order::Model, ServiceError> {
        if req.items.is_empty() {
            return Err(ServiceError::Validation("invalid_items".to_string()));
        }
        if req.items.iter().any(|i| i.quantity <= 0) {
            return Err(ServiceError::Validation("invalid_items".to_string()));
        }
        if req.shipping_address_text.trim().is_empty() {
            return Err(ServiceError::Validation(
                "shipping_address_required".to_string(),
            ));
        }

        // (1) Dedupe-then-sum by product_id: a request that repeats a
        // product_id across lines collapses into
        // one line carrying the combined quantity, for both pricing/stock
        // resolution and the resulting order_items/event payload.
        let mut quantities: HashMap<Uuid, i32> = HashMap::new();
        for item in &req.items {
            *quantities.entry(item.product_id).or_insert(0) += item.quantity;
        }
        let unique_ids: Vec<Uuid> = quantities.keys().copied().collect();

        // (2) Resolve the active catalog snapshot.
        let products = self.products.find_active_by_ids(&unique_ids).await?;
        if products.len() != unique_ids.len() {
            return Err(ServiceError::Validation("product_not_found".to_string()));
        }
        let by_id: HashMap<Uuid, _> = products.into_iter().map(|p| (p.id, p)).collect();

        // (3) subtotal = Σ price×qty over the deduped lines, tax = 0
        // (policy), total = subtotal. One order_items row per unique
        // product carrying the combined quantity, not one row per input
        // line.
        let mut subtotal = Decimal::ZERO;
        let mut order_items = Vec::with_capacity(unique_ids.len());
        for (product_id, quantity) in &quantities {
            let product = by_id
                .get(product_id)
                .expect("resolved above for every unique id");
            let line_total = product.price * Decimal::from(*quantity);
            subtotal += line_total;
            order_items.push(NewOrderItem {
                product_id: product.id,
                product_name: product.name.clone(),
                product_sku: product.sku.clone(),
                quantity: *quantity,
                unit_price: product.price,
            });
        }
        let tax = Decimal::ZERO;
        let total = subtotal + tax;

        // Stamped now rather than deferred to a successful reservation —
        // see NewOrder::reservation_expires_at for why.
        let reservation_expires_at =
            Utc::now() + Duration::seconds(self.reservation_ttl_secs as i64);

        let new_order = NewOrder {
            user_id: req.user_id,
            shipping_address_text: req.shipping_address_text,
            customer_notes: req.customer_notes,
            currency: "USD".to_string(),
            subtotal,
            tax,
            total,
            items: order_items,
            reservation_expires_at,
        };

        // (4)+(5) insert order + items, and enqueue the outbox row, all in
        // one transaction.
        let txn = self.db.begin().await?;
        let order = self.orders.create_in_txn(&txn, new_order).await?;

        let event_items: Vec<OrderItemPayload> = quantities
            .iter()
            .map(|(product_id, quantity)| OrderItemPayload {
                product_id: *product_id,
                quantity: *quantity,
            })
            .collect();
        outbox::enqueue(
            &txn,
            &EventData::OrdersCreated {
                order_id: order.id,
                user_id: order.user_id,
                items: event_items,
                total: order.total,
                currency: order.currency.clone(),
            },
        )
        .await?;

        txn.commit().await?;

        tracing::info!(order_id = %order.id, user_id = %req.user_id, "order submitted");
        Ok(order)
    }
}
