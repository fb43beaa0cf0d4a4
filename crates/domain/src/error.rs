//! Domain error types.

use common::ProductId;
use thiserror::Error;

use crate::order::OrderStatus;

/// Errors raised by order validation and status transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// An order must contain at least one line item.
    #[error("Order has no items")]
    NoItems,

    /// The same product appears more than once in one order.
    #[error("Duplicate product id: {0}")]
    DuplicateProduct(ProductId),

    /// Quantities must be positive.
    #[error("Invalid quantity for product {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// Prices cannot be negative.
    #[error("Invalid price for product {product_id}: {cents} cents")]
    InvalidPrice { product_id: ProductId, cents: i64 },

    /// The status string is not one of the accepted values.
    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    /// The requested status change is not allowed from the current status.
    #[error("Invalid state transition: cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
}
