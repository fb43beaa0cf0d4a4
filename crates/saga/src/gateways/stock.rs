//! Stock gateway trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::ProductId;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};

/// What the stock service reports for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockInfo {
    /// Display name, copied into line items at order time.
    pub name: String,
    /// Raw stock level, before reservations are subtracted.
    pub quantity: u32,
}

/// One line of a batched stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDecrement {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Remote inventory capability. Both operations are batched.
#[async_trait]
pub trait StockGateway: Send + Sync {
    /// Returns stock information for every known product among `product_ids`.
    /// Unknown products are simply absent from the map.
    async fn get_stock(&self, product_ids: &[ProductId]) -> Result<HashMap<ProductId, StockInfo>>;

    /// Decrements stock for all items, or for none of them.
    async fn decrement_stock(&self, items: &[StockDecrement]) -> Result<()>;
}

#[async_trait]
impl<T: StockGateway + ?Sized> StockGateway for Arc<T> {
    async fn get_stock(&self, product_ids: &[ProductId]) -> Result<HashMap<ProductId, StockInfo>> {
        (**self).get_stock(product_ids).await
    }

    async fn decrement_stock(&self, items: &[StockDecrement]) -> Result<()> {
        (**self).decrement_stock(items).await
    }
}

#[derive(Debug, Default)]
struct InMemoryStockState {
    products: HashMap<ProductId, StockInfo>,
    stock_queries: Vec<Vec<ProductId>>,
    decrements: Vec<Vec<StockDecrement>>,
    fail_on_get: bool,
    fail_on_decrement: bool,
    delay: Option<Duration>,
}

/// In-memory stock service for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockGateway {
    state: Arc<RwLock<InMemoryStockState>>,
}

impl InMemoryStockGateway {
    /// Creates a new in-memory stock service with no products.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, InMemoryStockState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryStockState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a product or replaces its stock level.
    pub fn set_product(&self, product_id: impl Into<ProductId>, name: &str, quantity: u32) {
        self.write().products.insert(
            product_id.into(),
            StockInfo {
                name: name.to_string(),
                quantity,
            },
        );
    }

    /// Returns the current raw stock level of a product.
    pub fn quantity(&self, product_id: impl Into<ProductId>) -> Option<u32> {
        self.read()
            .products
            .get(&product_id.into())
            .map(|info| info.quantity)
    }

    /// Configures the service to fail stock queries.
    pub fn set_fail_on_get(&self, fail: bool) {
        self.write().fail_on_get = fail;
    }

    /// Configures the service to fail decrements.
    pub fn set_fail_on_decrement(&self, fail: bool) {
        self.write().fail_on_decrement = fail;
    }

    /// Delays every call, to exercise caller timeouts.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.write().delay = delay;
    }

    /// Returns the number of stock queries received.
    pub fn stock_query_count(&self) -> usize {
        self.read().stock_queries.len()
    }

    /// Returns every decrement batch received, including rejected ones.
    pub fn decrements(&self) -> Vec<Vec<StockDecrement>> {
        self.read().decrements.clone()
    }

    async fn simulate_latency(&self) {
        let delay = self.read().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl StockGateway for InMemoryStockGateway {
    async fn get_stock(&self, product_ids: &[ProductId]) -> Result<HashMap<ProductId, StockInfo>> {
        self.simulate_latency().await;
        let mut state = self.write();
        state.stock_queries.push(product_ids.to_vec());

        if state.fail_on_get {
            return Err(SagaError::StockGateway("Stock service unavailable".to_string()));
        }

        Ok(product_ids
            .iter()
            .filter_map(|id| state.products.get(id).map(|info| (*id, info.clone())))
            .collect())
    }

    async fn decrement_stock(&self, items: &[StockDecrement]) -> Result<()> {
        self.simulate_latency().await;
        let mut state = self.write();
        state.decrements.push(items.to_vec());

        if state.fail_on_decrement {
            return Err(SagaError::StockGateway("Stock decrement rejected".to_string()));
        }

        for item in items {
            let current = state
                .products
                .get(&item.product_id)
                .map(|info| info.quantity)
                .unwrap_or(0);
            if current < item.quantity {
                return Err(SagaError::StockGateway(format!(
                    "Cannot decrement product {} by {}: {} left",
                    item.product_id, item.quantity, current
                )));
            }
        }

        for item in items {
            if let Some(info) = state.products.get_mut(&item.product_id) {
                info.quantity -= item.quantity;
            }
        }

        Ok(())
    }
}
