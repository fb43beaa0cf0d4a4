use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use common::{OrderId, ProductId, UserId};
use domain::{NewOrder, Order, OrderStatus, StockReservation};

use crate::{
    Result, StoreError,
    store::{OrderStore, StockLevels, default_reservation_ttl},
};

#[derive(Debug, Default)]
struct State {
    orders: BTreeMap<OrderId, Order>,
    reservations: Vec<StockReservation>,
    next_id: i64,
    unavailable: bool,
}

impl State {
    fn ensure_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(StoreError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }

    fn reserved_quantity(&self, product_id: ProductId, ttl: Duration, now: DateTime<Utc>) -> i64 {
        self.reservations
            .iter()
            .filter(|r| r.product_id == product_id && !r.is_expired(ttl, now))
            .map(|r| i64::from(r.quantity))
            .sum()
    }

    fn release_reservations(&mut self, order_id: OrderId) -> u64 {
        let before = self.reservations.len();
        self.reservations.retain(|r| r.order_id != order_id);
        (before - self.reservations.len()) as u64
    }
}

/// In-memory order store implementation for testing.
///
/// A single write lock is the serialization point for reservations, so
/// the availability check and the reservation insert are atomic with
/// respect to every other writer.
#[derive(Clone)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<State>>,
    reservation_ttl: Duration,
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            reservation_ttl: default_reservation_ttl(),
        }
    }
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long a reservation counts against available stock.
    pub fn with_reservation_ttl(mut self, ttl: Duration) -> Self {
        self.reservation_ttl = ttl;
        self
    }

    /// Makes every subsequent operation fail with `StoreError::Unavailable`.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns the number of reservations held across all orders.
    pub async fn reservation_count(&self) -> usize {
        self.state.read().await.reservations.len()
    }

    /// Shifts the creation time of an order's reservations into the past.
    pub async fn age_reservations(&self, order_id: OrderId, by: Duration) {
        let mut state = self.state.write().await;
        for reservation in state
            .reservations
            .iter_mut()
            .filter(|r| r.order_id == order_id)
        {
            reservation.created_at -= by;
        }
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, order: NewOrder, stock_levels: &StockLevels) -> Result<Order> {
        let mut state = self.state.write().await;
        state.ensure_available()?;

        let now = Utc::now();
        for item in &order.items {
            let raw = stock_levels.get(&item.product_id).copied().unwrap_or(0);
            let available = i64::from(raw)
                - state.reserved_quantity(item.product_id, self.reservation_ttl, now);
            if available < i64::from(item.quantity) {
                return Err(StoreError::InsufficientStock {
                    product_id: item.product_id,
                    requested: item.quantity,
                    available,
                });
            }
        }

        state.next_id += 1;
        let id = OrderId::new(state.next_id);

        state
            .reservations
            .extend(order.items.iter().map(|item| StockReservation {
                order_id: id,
                product_id: item.product_id,
                quantity: item.quantity,
                created_at: now,
            }));

        let order = Order {
            id,
            user_id: order.user_id,
            items: order.items,
            total_price: order.total_price,
            status: OrderStatus::Pending,
            created_at: now,
            stock_committed: false,
        };
        state.orders.insert(id, order.clone());

        Ok(order)
    }

    async fn get_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        let state = self.state.read().await;
        state.ensure_available()?;
        Ok(state.orders.get(&id).cloned())
    }

    async fn get_by_user_id(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        state.ensure_available()?;
        Ok(state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        state.ensure_available()?;

        match state.orders.get_mut(&id) {
            Some(order) if order.status == from => order.status = to,
            _ => return Ok(false),
        }
        if to == OrderStatus::Canceled {
            state.release_reservations(id);
        }
        Ok(true)
    }

    async fn cancel_order(&self, user_id: UserId, order_id: OrderId) -> Result<bool> {
        let mut state = self.state.write().await;
        state.ensure_available()?;

        match state.orders.get_mut(&order_id) {
            Some(order) if order.user_id == user_id && order.status != OrderStatus::Canceled => {
                order.status = OrderStatus::Canceled;
            }
            _ => return Ok(false),
        }
        state.release_reservations(order_id);
        Ok(true)
    }

    async fn delete(&self, id: OrderId) -> Result<bool> {
        let mut state = self.state.write().await;
        state.ensure_available()?;

        let removed = state.orders.remove(&id).is_some();
        state.release_reservations(id);
        Ok(removed)
    }

    async fn available_stock(&self, product_id: ProductId, raw_stock: u32) -> Result<i64> {
        let state = self.state.read().await;
        state.ensure_available()?;
        Ok(i64::from(raw_stock)
            - state.reserved_quantity(product_id, self.reservation_ttl, Utc::now()))
    }

    async fn reservations_for_order(&self, order_id: OrderId) -> Result<Vec<StockReservation>> {
        let state = self.state.read().await;
        state.ensure_available()?;
        Ok(state
            .reservations
            .iter()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn claim_stock_commit(&self, order_id: OrderId) -> Result<bool> {
        let mut state = self.state.write().await;
        state.ensure_available()?;

        match state.orders.get_mut(&order_id) {
            Some(order) if !order.stock_committed && order.status != OrderStatus::Canceled => {
                order.stock_committed = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revert_stock_commit(&self, order_id: OrderId) -> Result<()> {
        let mut state = self.state.write().await;
        state.ensure_available()?;

        if let Some(order) = state.orders.get_mut(&order_id) {
            order.stock_committed = false;
        }
        Ok(())
    }

    async fn consume_reservations(&self, order_id: OrderId) -> Result<u64> {
        let mut state = self.state.write().await;
        state.ensure_available()?;
        Ok(state.release_reservations(order_id))
    }

    async fn clear_expired_reservations(&self, ttl: Duration) -> Result<Vec<OrderId>> {
        let mut state = self.state.write().await;
        state.ensure_available()?;

        let now = Utc::now();
        let mut affected = BTreeSet::new();
        state.reservations.retain(|r| {
            if r.is_expired(ttl, now) {
                affected.insert(r.order_id);
                false
            } else {
                true
            }
        });

        Ok(affected.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{Money, OrderLine};

    fn new_order(user: i64, lines: &[(i64, u32)]) -> NewOrder {
        let items = lines
            .iter()
            .map(|&(product, qty)| {
                OrderLine::new(product, qty, Money::from_cents(1000))
                    .into_line_item(format!("Product {product}"))
            })
            .collect();
        NewOrder::new(UserId::new(user), items, Money::from_cents(5000))
    }

    fn levels(entries: &[(i64, u32)]) -> StockLevels {
        entries
            .iter()
            .map(|&(product, qty)| (ProductId::new(product), qty))
            .collect()
    }

    #[tokio::test]
    async fn test_create_persists_order_and_reservations() {
        let store = InMemoryOrderStore::new();

        let order = store
            .create(new_order(1, &[(1, 2), (2, 1)]), &levels(&[(1, 10), (2, 5)]))
            .await
            .unwrap();

        assert_eq!(order.id, OrderId::new(1));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.items.len(), 2);

        let reservations = store.reservations_for_order(order.id).await.unwrap();
        assert_eq!(reservations.len(), 2);
        assert_eq!(store.available_stock(ProductId::new(1), 10).await.unwrap(), 8);
        assert_eq!(store.available_stock(ProductId::new(2), 5).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_insufficient_stock_writes_nothing() {
        let store = InMemoryOrderStore::new();

        let result = store
            .create(new_order(1, &[(1, 2), (2, 9)]), &levels(&[(1, 10), (2, 5)]))
            .await;

        assert!(matches!(
            result,
            Err(StoreError::InsufficientStock { product_id, requested: 9, available: 5 })
                if product_id == ProductId::new(2)
        ));
        assert_eq!(store.order_count().await, 0);
        assert_eq!(store.reservation_count().await, 0);
    }

    #[tokio::test]
    async fn test_reservations_reduce_availability_for_later_orders() {
        let store = InMemoryOrderStore::new();
        let stock = levels(&[(1, 3)]);

        store.create(new_order(1, &[(1, 2)]), &stock).await.unwrap();
        let second = store.create(new_order(2, &[(1, 2)]), &stock).await;

        assert!(matches!(second, Err(StoreError::InsufficientStock { available: 1, .. })));
    }

    #[tokio::test]
    async fn test_expired_reservations_do_not_count() {
        let store = InMemoryOrderStore::new().with_reservation_ttl(Duration::minutes(5));
        let stock = levels(&[(1, 3)]);

        let first = store.create(new_order(1, &[(1, 3)]), &stock).await.unwrap();
        store.age_reservations(first.id, Duration::minutes(6)).await;

        assert_eq!(store.available_stock(ProductId::new(1), 3).await.unwrap(), 3);
        assert!(store.create(new_order(2, &[(1, 3)]), &stock).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_creates_never_oversubscribe() {
        let store = InMemoryOrderStore::new();
        let stock = levels(&[(1, 10)]);

        let handles: Vec<_> = (0..10)
            .map(|user| {
                let store = store.clone();
                let stock = stock.clone();
                tokio::spawn(async move { store.create(new_order(user, &[(1, 3)]), &stock).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 3);
        assert_eq!(store.available_stock(ProductId::new(1), 10).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_status_requires_expected_current_status() {
        let store = InMemoryOrderStore::new();
        let order = store
            .create(new_order(1, &[(1, 1)]), &levels(&[(1, 1)]))
            .await
            .unwrap();

        assert!(!store
            .update_status(order.id, OrderStatus::Paid, OrderStatus::Shipped)
            .await
            .unwrap());
        assert!(store
            .update_status(order.id, OrderStatus::Pending, OrderStatus::Paid)
            .await
            .unwrap());

        let stored = store.get_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_canceling_releases_reservations() {
        let store = InMemoryOrderStore::new();
        let order = store
            .create(new_order(1, &[(1, 2)]), &levels(&[(1, 2)]))
            .await
            .unwrap();

        store
            .update_status(order.id, OrderStatus::Pending, OrderStatus::Canceled)
            .await
            .unwrap();

        assert_eq!(store.reservation_count().await, 0);
        assert_eq!(store.available_stock(ProductId::new(1), 2).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cancel_order_checks_owner() {
        let store = InMemoryOrderStore::new();
        let order = store
            .create(new_order(1, &[(1, 1)]), &levels(&[(1, 1)]))
            .await
            .unwrap();

        assert!(!store.cancel_order(UserId::new(2), order.id).await.unwrap());
        assert_eq!(store.reservation_count().await, 1);

        assert!(store.cancel_order(UserId::new(1), order.id).await.unwrap());
        assert!(!store.cancel_order(UserId::new(1), order.id).await.unwrap());
        assert_eq!(store.reservation_count().await, 0);
    }

    #[tokio::test]
    async fn test_stock_commit_can_be_claimed_once() {
        let store = InMemoryOrderStore::new();
        let order = store
            .create(new_order(1, &[(1, 1)]), &levels(&[(1, 1)]))
            .await
            .unwrap();

        assert!(store.claim_stock_commit(order.id).await.unwrap());
        assert!(!store.claim_stock_commit(order.id).await.unwrap());

        store.revert_stock_commit(order.id).await.unwrap();
        assert!(store.claim_stock_commit(order.id).await.unwrap());
        assert!(!store.claim_stock_commit(OrderId::new(99)).await.unwrap());
    }

    #[tokio::test]
    async fn test_canceled_order_stock_commit_not_claimed() {
        let store = InMemoryOrderStore::new();
        let order = store
            .create(new_order(1, &[(1, 1)]), &levels(&[(1, 1)]))
            .await
            .unwrap();

        assert!(store.cancel_order(UserId::new(1), order.id).await.unwrap());

        assert!(!store.claim_stock_commit(order.id).await.unwrap());
        let stored = store.get_by_id(order.id).await.unwrap().unwrap();
        assert!(!stored.stock_committed);
    }

    #[tokio::test]
    async fn test_clear_expired_returns_affected_orders() {
        let store = InMemoryOrderStore::new();
        let stock = levels(&[(1, 10), (2, 10)]);

        let old = store.create(new_order(1, &[(1, 1), (2, 1)]), &stock).await.unwrap();
        let fresh = store.create(new_order(2, &[(1, 1)]), &stock).await.unwrap();
        store.age_reservations(old.id, Duration::minutes(10)).await;

        let affected = store
            .clear_expired_reservations(Duration::minutes(5))
            .await
            .unwrap();

        assert_eq!(affected, vec![old.id]);
        assert!(store.reservations_for_order(old.id).await.unwrap().is_empty());
        assert_eq!(store.reservations_for_order(fresh.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_orders_by_user_in_creation_order() {
        let store = InMemoryOrderStore::new();
        let stock = levels(&[(1, 10)]);

        let a = store.create(new_order(1, &[(1, 1)]), &stock).await.unwrap();
        store.create(new_order(2, &[(1, 1)]), &stock).await.unwrap();
        let c = store.create(new_order(1, &[(1, 1)]), &stock).await.unwrap();

        let ids: Vec<_> = store
            .get_by_user_id(UserId::new(1))
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(ids, vec![a.id, c.id]);
    }

    #[tokio::test]
    async fn test_delete_removes_order_and_reservations() {
        let store = InMemoryOrderStore::new();
        let order = store
            .create(new_order(1, &[(1, 1)]), &levels(&[(1, 1)]))
            .await
            .unwrap();

        assert!(store.delete(order.id).await.unwrap());
        assert!(!store.delete(order.id).await.unwrap());
        assert!(store.get_by_id(order.id).await.unwrap().is_none());
        assert_eq!(store.reservation_count().await, 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_operations() {
        let store = InMemoryOrderStore::new();
        store.set_unavailable(true).await;

        let result = store.get_by_id(OrderId::new(1)).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
