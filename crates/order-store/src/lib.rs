//! Order store: persistent repository of orders, line items and stock
//! reservations.
//!
//! Two implementations share the [`OrderStore`] contract:
//! - [`InMemoryOrderStore`] for tests and local runs
//! - [`PostgresOrderStore`] backed by sqlx

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;
pub use store::{DEFAULT_RESERVATION_TTL_SECS, OrderStore, StockLevels, default_reservation_ttl};
