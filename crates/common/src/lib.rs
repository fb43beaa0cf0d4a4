//! Identifier types shared across the order fulfillment crates.

mod types;

pub use types::{OrderId, ProductId, UserId};
