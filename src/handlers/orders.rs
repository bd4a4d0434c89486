//! `POST /api/orders` and `GET /api/orders/{id}`. Both require a
//! bearer token; the submit handler hands the request straight to
//! `OrderSubmit`, which owns every validation and pricing rule.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::entities::{order, order_item};
use crate::errors::ServiceError;
use crate::repositories::OrderRepository;
use crate::saga::order_submit::{OrderSubmit, SubmitItem, SubmitRequest};

#[derive(Debug, Deserialize)]
pub struct SubmitItemBody {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct SubmitOrderBody {
    pub shipping_address_text: String,
    #[serde(default)]
    pub customer_notes: Option<String>,
    pub items: Vec<SubmitItemBody>,
}

#[derive(Debug, Serialize)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub product_name: String,
    pub product_sku: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub status: String,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub shipping_address_text: String,
    pub customer_notes: Option<String>,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
}

impl OrderResponse {
    fn from_model(order: order::Model, items: Vec<order_item::Model>) -> Self {
        Self {
            id: order.id,
            status: order.status.to_string(),
            subtotal: order.subtotal,
            tax: order.tax,
            total: order.total,
            currency: order.currency,
            shipping_address_text: order.shipping_address_text,
            customer_notes: order.customer_notes,
            items: items
                .into_iter()
                .map(|i| OrderItemResponse {
                    product_id: i.product_id,
                    product_name: i.product_name,
                    product_sku: i.product_sku,
                    quantity: i.quantity,
                    unit_price: i.unit_price,
                    total_price: i.total_price,
                })
                .collect(),
            created_at: order.created_at,
        }
    }
}

#[derive(Clone)]
pub struct OrdersState {
    pub order_submit: Arc<OrderSubmit>,
    pub orders: Arc<OrderRepository>,
}

pub fn routes(state: OrdersState) -> Router {
    Router::new()
        .route("/", post(submit_order))
        .route("/:id", get(get_order))
        .with_state(state)
}

async fn submit_order(
    State(state): State<OrdersState>,
    user: AuthUser,
    Json(body): Json<SubmitOrderBody>,
) -> Result<(StatusCode, Json<OrderResponse>), ServiceError> {
    let req = SubmitRequest {
        user_id: user.user_id,
        shipping_address_text: body.shipping_address_text,
        customer_notes: body.customer_notes,
        items: body
            .items
            .into_iter()
            .map(|i| SubmitItem {
                product_id: i.product_id,
                quantity: i.quantity,
            })
            .collect(),
    };

    let order = state.order_submit.submit(req).await?;
    let items = state.orders.find_items(order.id).await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from_model(order, items))))
}

async fn get_order(
    State(state): State<OrdersState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ServiceError> {
    let order = state
        .orders
        .find_by_id(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("order {} not found", id)))?;

    if order.user_id != user.user_id && !user.is_admin() {
        return Err(ServiceError::Forbidden);
    }

    let items = state.orders.find_items(id).await?;
    Ok(Json(OrderResponse::from_model(order, items)))
}
