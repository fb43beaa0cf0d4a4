//! Order status state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::OrderError;

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Paid ──► Shipped ──► Delivered
///    │                   ▲
///    └───────────────────┘
///
/// Pending | Paid | Shipped | Delivered ──► Canceled
/// ```
///
/// Transitions are always driven from outside (payment events or explicit
/// API calls); nothing in the system infers one on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Created and awaiting payment.
    #[default]
    Pending,

    /// Payment confirmed.
    Paid,

    /// Handed over to shipping.
    Shipped,

    /// Received by the customer.
    Delivered,

    /// Canceled by the customer, an operator or a payment outcome (terminal state).
    #[serde(alias = "cancelled")]
    Canceled,
}

/// Outcome of checking a status change against the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The status must be written.
    Applied,
    /// The order is already at (or past) the requested status; nothing to write.
    Unchanged,
}

impl OrderStatus {
    /// Statuses that may be set through a status update.
    pub const UPDATABLE: [OrderStatus; 4] = [
        OrderStatus::Paid,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Canceled,
    ];

    /// Returns the status name as stored and sent over the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Canceled => "canceled",
        }
    }

    /// Returns true if a status update may target this status.
    pub fn is_updatable(&self) -> bool {
        Self::UPDATABLE.contains(self)
    }

    /// Position along the forward lifecycle. Canceled has none.
    fn rank(&self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::Paid => Some(1),
            OrderStatus::Shipped => Some(2),
            OrderStatus::Delivered => Some(3),
            OrderStatus::Canceled => None,
        }
    }

    /// Checks whether moving from `self` to `next` is allowed.
    ///
    /// Requesting the current status, or a status the order has already
    /// moved past, is reported as [`Transition::Unchanged`] so that a
    /// redelivered event leaves the order as it is.
    pub fn check_transition(self, next: OrderStatus) -> Result<Transition, OrderError> {
        if self == next {
            return Ok(Transition::Unchanged);
        }

        let allowed = matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Paid)
                | (OrderStatus::Pending | OrderStatus::Paid, OrderStatus::Shipped)
                | (OrderStatus::Shipped, OrderStatus::Delivered)
        ) || (self != OrderStatus::Canceled && next == OrderStatus::Canceled);

        if allowed {
            return Ok(Transition::Applied);
        }

        match (self.rank(), next.rank()) {
            (Some(current), Some(requested)) if requested < current => Ok(Transition::Unchanged),
            _ => Err(OrderError::InvalidTransition {
                from: self,
                to: next,
            }),
        }
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "canceled" | "cancelled" => Ok(OrderStatus::Canceled),
            other => Err(OrderError::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
