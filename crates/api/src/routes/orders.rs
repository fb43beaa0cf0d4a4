//! Order endpoints backed by the order orchestrator.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{OrderId, ProductId, UserId};
use domain::{Money, Order, OrderLine, OrderStatus, Transition};
use order_store::OrderStore;
use saga::{OrderOrchestrator, PaymentGateway, SagaError, StockGateway};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::identity::CurrentUser;

/// Orchestrator over type-erased collaborators, so the binary can pick
/// Postgres or in-memory stores and HTTP or in-memory gateways at startup.
pub type Orchestrator =
    OrderOrchestrator<Arc<dyn OrderStore>, Arc<dyn StockGateway>, Arc<dyn PaymentGateway>>;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Arc<Self> {
        Arc::new(Self { orchestrator })
    }
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderItemRequest>,
    pub total_price_cents: i64,
}

#[derive(Deserialize)]
pub struct OrderItemRequest {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderCreatedResponse {
    pub order_id: OrderId,
    pub payment_url: String,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub items: Vec<OrderItemResponse>,
    pub total_price_cents: i64,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Serialize)]
pub struct StatusUpdateResponse {
    pub order_id: OrderId,
    pub status: OrderStatus,
    /// False when the order already had (or had moved past) the requested status.
    pub changed: bool,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            status: order.status,
            items: order
                .items
                .into_iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id,
                    product_name: item.product_name,
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price.cents(),
                })
                .collect(),
            total_price_cents: order.total_price.cents(),
            created_at: order.created_at.to_rfc3339(),
        }
    }
}

// -- Handlers --

/// POST /orders: place an order and return where to pay for it.
#[tracing::instrument(skip(state, body))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let lines = req
        .items
        .into_iter()
        .map(|item| {
            OrderLine::new(
                item.product_id,
                item.quantity,
                Money::from_cents(item.unit_price_cents),
            )
        })
        .collect();

    let reference = state
        .orchestrator
        .create_order(user_id, lines, Money::from_cents(req.total_price_cents))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(OrderCreatedResponse {
            order_id: reference.order_id,
            payment_url: reference.checkout_url,
        }),
    ))
}

/// GET /orders: the caller's orders, oldest first.
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = state.orchestrator.get_orders_by_user_id(user_id).await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

/// GET /orders/{id}: one of the caller's orders.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.orchestrator.get_order_by_id(order_id).await?;
    if !order.is_owned_by(user_id) {
        return Err(SagaError::Forbidden { order_id, user_id }.into());
    }
    Ok(Json(order.into()))
}

/// POST /orders/{id}/cancel: cancel one of the caller's orders.
#[tracing::instrument(skip(state))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    state.orchestrator.cancel_order(user_id, order_id).await?;
    let order = state.orchestrator.get_order_by_id(order_id).await?;
    Ok(Json(order.into()))
}

/// PUT /orders/{id}/status: move an order along its lifecycle.
#[tracing::instrument(skip(state, body))]
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user_id): CurrentUser,
    Path(id): Path<String>,
    body: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<StatusUpdateResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let transition = state
        .orchestrator
        .update_order_status(order_id, &req.status)
        .await?;
    let order = state.orchestrator.get_order_by_id(order_id).await?;

    Ok(Json(StatusUpdateResponse {
        order_id,
        status: order.status,
        changed: transition == Transition::Applied,
    }))
}

/// DELETE /orders/{id}: remove an order with its line items and reservations.
#[tracing::instrument(skip(state))]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let order_id = parse_order_id(&id)?;
    state.orchestrator.delete_order(order_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .map(OrderId::new)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid order id: {id}")))
}
