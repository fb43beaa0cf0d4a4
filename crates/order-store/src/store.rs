use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use common::{OrderId, ProductId, UserId};
use domain::{NewOrder, Order, OrderStatus, StockReservation};

use crate::Result;

/// Reservations older than this no longer count against available stock.
pub const DEFAULT_RESERVATION_TTL_SECS: i64 = 300;

/// Returns the default reservation time-to-live (five minutes).
pub fn default_reservation_ttl() -> Duration {
    Duration::seconds(DEFAULT_RESERVATION_TTL_SECS)
}

/// Raw stock levels per product, as reported by the stock service.
pub type StockLevels = HashMap<ProductId, u32>;

/// Core trait for order store implementations.
///
/// The store is shared by the request path and every event consumer, so
/// implementations must be thread-safe and must serialize conflicting
/// writes themselves: reservations per product, status changes per order.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new `pending` order together with one stock reservation
    /// per line item.
    ///
    /// Runs as a single unit: under a per-product serialization point the
    /// store recomputes `raw stock - active reservations` for every line
    /// (raw levels come from `stock_levels`; a missing product counts as
    /// zero) and fails with `InsufficientStock` without writing anything
    /// if any line no longer fits. Otherwise the order, its items and its
    /// reservations are committed together.
    async fn create(&self, order: NewOrder, stock_levels: &StockLevels) -> Result<Order>;

    /// Loads an order with its line items.
    async fn get_by_id(&self, id: OrderId) -> Result<Option<Order>>;

    /// Loads all orders of a user, oldest first.
    async fn get_by_user_id(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Moves an order from `from` to `to`.
    ///
    /// Only writes when the current status still equals `from`; returns
    /// whether a row changed. Moving to `canceled` also releases the
    /// order's reservations in the same transaction.
    async fn update_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool>;

    /// Cancels an order if it belongs to `user_id` and is not canceled yet,
    /// releasing its reservations. Returns whether a row changed.
    async fn cancel_order(&self, user_id: UserId, order_id: OrderId) -> Result<bool>;

    /// Hard-deletes an order with its items and reservations.
    async fn delete(&self, id: OrderId) -> Result<bool>;

    /// Returns `raw_stock` minus the active reservations for a product.
    async fn available_stock(&self, product_id: ProductId, raw_stock: u32) -> Result<i64>;

    /// Returns the reservations currently held for an order.
    async fn reservations_for_order(&self, order_id: OrderId) -> Result<Vec<StockReservation>>;

    /// Marks the order's stock as committed to the stock service.
    ///
    /// Returns true only for the single caller that flipped the marker.
    /// A canceled order is never claimed, even if it was canceled after
    /// the caller last read it.
    async fn claim_stock_commit(&self, order_id: OrderId) -> Result<bool>;

    /// Clears the stock commit marker after a failed decrement.
    async fn revert_stock_commit(&self, order_id: OrderId) -> Result<()>;

    /// Removes the order's reservations once its stock has been decremented.
    async fn consume_reservations(&self, order_id: OrderId) -> Result<u64>;

    /// Deletes every reservation at least `ttl` old and returns the ids of
    /// the orders they belonged to (deduplicated, ascending).
    async fn clear_expired_reservations(&self, ttl: Duration) -> Result<Vec<OrderId>>;
}

#[async_trait]
impl<T: OrderStore + ?Sized> OrderStore for Arc<T> {
    async fn create(&self, order: NewOrder, stock_levels: &StockLevels) -> Result<Order> {
        (**self).create(order, stock_levels).await
    }

    async fn get_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        (**self).get_by_id(id).await
    }

    async fn get_by_user_id(&self, user_id: UserId) -> Result<Vec<Order>> {
        (**self).get_by_user_id(user_id).await
    }

    async fn update_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        (**self).update_status(id, from, to).await
    }

    async fn cancel_order(&self, user_id: UserId, order_id: OrderId) -> Result<bool> {
        (**self).cancel_order(user_id, order_id).await
    }

    async fn delete(&self, id: OrderId) -> Result<bool> {
        (**self).delete(id).await
    }

    async fn available_stock(&self, product_id: ProductId, raw_stock: u32) -> Result<i64> {
        (**self).available_stock(product_id, raw_stock).await
    }

    async fn reservations_for_order(&self, order_id: OrderId) -> Result<Vec<StockReservation>> {
        (**self).reservations_for_order(order_id).await
    }

    async fn claim_stock_commit(&self, order_id: OrderId) -> Result<bool> {
        (**self).claim_stock_commit(order_id).await
    }

    async fn revert_stock_commit(&self, order_id: OrderId) -> Result<()> {
        (**self).revert_stock_commit(order_id).await
    }

    async fn consume_reservations(&self, order_id: OrderId) -> Result<u64> {
        (**self).consume_reservations(order_id).await
    }

    async fn clear_expired_reservations(&self, ttl: Duration) -> Result<Vec<OrderId>> {
        (**self).clear_expired_reservations(ttl).await
    }
}
