//! Order fulfillment saga.
//!
//! This crate coordinates inventory, payment and persistent order state
//! without a shared transaction across them:
//! 1. Place the order: read stock, persist the order with its reservations,
//!    open a checkout
//! 2. Apply payment outcomes: move the status, commit reserved stock once
//! 3. Reap reservations held by orders that were never paid
//!
//! The stock and payment services are reached through the [`StockGateway`]
//! and [`PaymentGateway`] traits.

pub mod error;
pub mod gateways;
pub mod orchestrator;
pub mod reaper;

pub use error::{Result, SagaError};
pub use gateways::{
    Checkout, CheckoutRequest, HttpPaymentGateway, HttpStockGateway, InMemoryPaymentGateway,
    InMemoryStockGateway, PaymentGateway, StockDecrement, StockGateway, StockInfo,
};
pub use orchestrator::{OrchestratorConfig, OrderOrchestrator};
pub use reaper::{ReaperConfig, ReaperHandle, ReservationReaper, SweepReport};
