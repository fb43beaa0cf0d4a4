//! Domain layer for the order fulfillment system.
//!
//! This crate provides the data model shared by the store, the saga
//! orchestrator and the event consumers:
//! - [`Order`] and its immutable [`LineItem`]s
//! - [`OrderStatus`] with the allowed status transitions
//! - [`StockReservation`] for inventory held pending payment
//! - [`Money`] amounts in integer cents

pub mod error;
pub mod order;

pub use common::{OrderId, ProductId, UserId};
pub use error::OrderError;
pub use order::{
    LineItem, Money, NewOrder, Order, OrderLine, OrderStatus, PaymentReference, StockReservation,
    Transition, validate_lines,
};
