//! Saga error types.

use common::{OrderId, ProductId, UserId};
use domain::{OrderError, OrderStatus};
use order_store::StoreError;
use thiserror::Error;

/// Errors that can occur while driving the order saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The request was rejected before any side effect happened.
    #[error("Validation error: {0}")]
    Validation(OrderError),

    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The stock service does not know the product.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// Not enough unreserved stock for a line item.
    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: i64,
    },

    /// The order belongs to another user.
    #[error("Order {order_id} does not belong to user {user_id}")]
    Forbidden { order_id: OrderId, user_id: UserId },

    /// The order cannot move to the requested status.
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// The order status kept changing underneath a status update.
    #[error("Concurrent update on order {0}")]
    ConcurrentUpdate(OrderId),

    /// Stock service error, including timeouts.
    #[error("Stock service error: {0}")]
    StockGateway(String),

    /// Payment service error, including timeouts.
    #[error("Payment service error: {0}")]
    PaymentGateway(String),

    /// Order store error.
    #[error("Order store error: {0}")]
    Store(StoreError),
}

impl SagaError {
    /// Returns true for errors caused by the request itself rather than
    /// by a collaborator.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SagaError::Validation(_)
                | SagaError::OrderNotFound(_)
                | SagaError::ProductNotFound(_)
                | SagaError::InsufficientStock { .. }
                | SagaError::Forbidden { .. }
                | SagaError::InvalidTransition { .. }
        )
    }
}

impl From<OrderError> for SagaError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::InvalidTransition { from, to } => SagaError::InvalidTransition { from, to },
            other => SagaError::Validation(other),
        }
    }
}

impl From<StoreError> for SagaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientStock {
                product_id,
                requested,
                available,
            } => SagaError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            other => SagaError::Store(other),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
