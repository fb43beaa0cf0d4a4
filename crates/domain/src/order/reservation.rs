//! Stock held for orders awaiting payment.

use chrono::{DateTime, Duration, Utc};
use common::{OrderId, ProductId};
use serde::{Deserialize, Serialize};

/// Inventory provisionally held for one line of a pending order.
///
/// Available stock for a product is its raw stock level minus the sum of
/// all active reservations for that product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReservation {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
}

impl StockReservation {
    /// Returns true if the reservation is at least `ttl` old at `now`.
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.created_at <= now - ttl
    }
}
