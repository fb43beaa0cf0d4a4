//! Remote collaborators of the saga: the stock and payment services.

pub mod http;
pub mod payment;
pub mod stock;

pub use http::{HttpPaymentGateway, HttpStockGateway};
pub use payment::{Checkout, CheckoutRequest, InMemoryPaymentGateway, PaymentGateway};
pub use stock::{InMemoryStockGateway, StockDecrement, StockGateway, StockInfo};
