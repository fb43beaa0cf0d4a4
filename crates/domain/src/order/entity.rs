//! Orders as persisted by the order store.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};

use super::{LineItem, Money, OrderStatus};

/// An order that has not been persisted yet.
///
/// The store assigns the id and creation timestamp when it writes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub user_id: UserId,
    pub items: Vec<LineItem>,
    pub total_price: Money,
}

impl NewOrder {
    pub fn new(user_id: UserId, items: Vec<LineItem>, total_price: Money) -> Self {
        Self {
            user_id,
            items,
            total_price,
        }
    }
}

/// A persisted order.
///
/// Only `status` (and the internal stock commit marker) change after
/// creation; the line items and total price are fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub items: Vec<LineItem>,
    /// Total supplied by the client at creation; never recomputed.
    pub total_price: Money,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    /// Set once the stock service has been asked to decrement this order's items.
    /// Saga bookkeeping; never serialized.
    #[serde(skip)]
    pub stock_committed: bool,
}

impl Order {
    /// Returns true if the order belongs to the given user.
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }
}

/// Where the customer pays for an order. Returned to the caller, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReference {
    pub order_id: OrderId,
    pub checkout_url: String,
}
