//! Order orchestrator: drives both legs of the order fulfillment saga.
//!
//! The synchronous leg places an order: validate, read stock, persist the
//! order together with its reservations, open a checkout. The asynchronous
//! leg applies payment outcomes: move the status, then commit the reserved
//! stock exactly once.

use std::future::Future;
use std::time::{Duration, Instant};

use common::{OrderId, UserId};
use domain::{
    Money, NewOrder, Order, OrderError, OrderLine, OrderStatus, PaymentReference, Transition,
    validate_lines,
};
use order_store::{OrderStore, StockLevels, StoreError};

use crate::error::{Result, SagaError};
use crate::gateways::{PaymentGateway, StockDecrement, StockGateway};

/// Number of times a status update reloads the order after losing a race.
const MAX_STATUS_ATTEMPTS: usize = 3;

/// Tuning for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound for every stock and payment service call.
    pub gateway_timeout: Duration,
    /// Upper bound for every order store operation.
    pub store_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(3),
            store_timeout: Duration::from_secs(2),
        }
    }
}

/// Orchestrates the order fulfillment saga.
///
/// There is no shared transaction across the store and the two remote
/// services. Each step either completes or leaves the order in an
/// inspectable state: an order whose checkout could not be opened stays
/// `pending` and its reservations lapse after the reservation TTL.
pub struct OrderOrchestrator<S, St, P>
where
    S: OrderStore,
    St: StockGateway,
    P: PaymentGateway,
{
    store: S,
    stock: St,
    payment: P,
    config: OrchestratorConfig,
}

impl<S, St, P> OrderOrchestrator<S, St, P>
where
    S: OrderStore,
    St: StockGateway,
    P: PaymentGateway,
{
    /// Creates a new orchestrator with the default configuration.
    pub fn new(store: S, stock: St, payment: P) -> Self {
        Self::with_config(store, stock, payment, OrchestratorConfig::default())
    }

    /// Creates a new orchestrator with an explicit configuration.
    pub fn with_config(store: S, stock: St, payment: P, config: OrchestratorConfig) -> Self {
        Self {
            store,
            stock,
            payment,
            config,
        }
    }

    /// Returns the underlying order store.
    pub fn store(&self) -> &S {
        &self.store
    }

    async fn stock_call<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.config.gateway_timeout;
        tokio::time::timeout(timeout, call).await.unwrap_or_else(|_| {
            Err(SagaError::StockGateway(format!(
                "request timed out after {timeout:?}"
            )))
        })
    }

    async fn store_call<T>(
        &self,
        call: impl Future<Output = order_store::Result<T>>,
    ) -> Result<T> {
        let timeout = self.config.store_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Unavailable(format!(
                "store operation timed out after {timeout:?}"
            ))
            .into()),
        }
    }

    async fn payment_call<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.config.gateway_timeout;
        tokio::time::timeout(timeout, call).await.unwrap_or_else(|_| {
            Err(SagaError::PaymentGateway(format!(
                "request timed out after {timeout:?}"
            )))
        })
    }

    /// Places an order and returns where the customer pays for it.
    ///
    /// Duplicate calls create duplicate orders. If the payment service
    /// fails, the persisted order is kept in `pending` and the error is
    /// returned.
    #[tracing::instrument(skip(self, lines), fields(%user_id, items = lines.len()))]
    pub async fn create_order(
        &self,
        user_id: UserId,
        lines: Vec<OrderLine>,
        total_price: Money,
    ) -> Result<PaymentReference> {
        let start = Instant::now();
        let result = self.place_order(user_id, lines, total_price).await;
        metrics::histogram!("order_creation_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        match &result {
            Ok(reference) => {
                metrics::counter!("orders_created_total").increment(1);
                tracing::info!(order_id = %reference.order_id, "order placed");
            }
            Err(err) => {
                metrics::counter!("order_creation_failed_total").increment(1);
                tracing::warn!(error = %err, "order placement failed");
            }
        }

        result
    }

    async fn place_order(
        &self,
        user_id: UserId,
        lines: Vec<OrderLine>,
        total_price: Money,
    ) -> Result<PaymentReference> {
        validate_lines(&lines)?;

        let product_ids: Vec<_> = lines.iter().map(|line| line.product_id).collect();
        let stock = self.stock_call(self.stock.get_stock(&product_ids)).await?;

        let mut levels = StockLevels::with_capacity(lines.len());
        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let info = stock
                .get(&line.product_id)
                .ok_or(SagaError::ProductNotFound(line.product_id))?;

            // Advisory; the store re-checks under its lock.
            let available = self
                .store_call(self.store.available_stock(line.product_id, info.quantity))
                .await?;
            if available < i64::from(line.quantity) {
                return Err(SagaError::InsufficientStock {
                    product_id: line.product_id,
                    requested: line.quantity,
                    available,
                });
            }

            levels.insert(line.product_id, info.quantity);
            items.push(line.into_line_item(info.name.clone()));
        }

        let order = self
            .store_call(
                self.store
                    .create(NewOrder::new(user_id, items, total_price), &levels),
            )
            .await?;
        tracing::debug!(order_id = %order.id, "order persisted with reservations");

        let checkout = self
            .payment_call(
                self.payment
                    .create_checkout(user_id, order.id, order.total_price),
            )
            .await
            .inspect_err(|err| {
                tracing::warn!(
                    order_id = %order.id,
                    error = %err,
                    "checkout failed, order left pending"
                );
            })?;

        Ok(PaymentReference {
            order_id: order.id,
            checkout_url: checkout.checkout_url,
        })
    }

    /// Loads an order.
    pub async fn get_order_by_id(&self, order_id: OrderId) -> Result<Order> {
        self.store_call(self.store.get_by_id(order_id))
            .await?
            .ok_or(SagaError::OrderNotFound(order_id))
    }

    /// Loads all orders of a user in creation order.
    pub async fn get_orders_by_user_id(&self, user_id: UserId) -> Result<Vec<Order>> {
        self.store_call(self.store.get_by_user_id(user_id)).await
    }

    /// Cancels an order on behalf of its owner and releases its reservations.
    ///
    /// Canceling an already canceled order succeeds without a write.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, user_id: UserId, order_id: OrderId) -> Result<()> {
        let order = self.get_order_by_id(order_id).await?;
        if !order.is_owned_by(user_id) {
            return Err(SagaError::Forbidden { order_id, user_id });
        }

        if order.status.check_transition(OrderStatus::Canceled)? == Transition::Unchanged {
            return Ok(());
        }

        if self
            .store_call(self.store.cancel_order(user_id, order_id))
            .await?
        {
            metrics::counter!(
                "order_status_updates_total",
                "status" => OrderStatus::Canceled.as_str()
            )
            .increment(1);
            tracing::info!(from = %order.status, "order canceled by owner");
        }
        Ok(())
    }

    /// Moves an order to `status`.
    ///
    /// Only `paid`, `shipped`, `delivered` and `canceled` (or `cancelled`)
    /// are accepted. Requesting the current status, or one the order has
    /// already moved past, returns [`Transition::Unchanged`] without a write.
    #[tracing::instrument(skip(self))]
    pub async fn update_order_status(&self, order_id: OrderId, status: &str) -> Result<Transition> {
        let next = parse_requested_status(status)?;
        self.transition(order_id, next).await
    }

    async fn transition(&self, order_id: OrderId, next: OrderStatus) -> Result<Transition> {
        for _ in 0..MAX_STATUS_ATTEMPTS {
            let order = self.get_order_by_id(order_id).await?;

            if order.status.check_transition(next)? == Transition::Unchanged {
                tracing::debug!(current = %order.status, requested = %next, "status unchanged");
                return Ok(Transition::Unchanged);
            }

            if self
                .store_call(self.store.update_status(order_id, order.status, next))
                .await?
            {
                metrics::counter!("order_status_updates_total", "status" => next.as_str())
                    .increment(1);
                tracing::info!(from = %order.status, to = %next, "order status updated");
                return Ok(Transition::Applied);
            }

            tracing::debug!("order status changed concurrently, reloading");
        }

        Err(SagaError::ConcurrentUpdate(order_id))
    }

    /// Hard-deletes an order with its items and reservations.
    #[tracing::instrument(skip(self))]
    pub async fn delete_order(&self, order_id: OrderId) -> Result<()> {
        if !self.store_call(self.store.delete(order_id)).await? {
            return Err(SagaError::OrderNotFound(order_id));
        }
        tracing::info!("order deleted");
        Ok(())
    }

    /// Applies one payment-outcome event.
    ///
    /// Safe to call repeatedly with the same event: the status moves once,
    /// and the stock of a paid order is decremented by exactly one caller,
    /// the one that claims the order's stock commit. The claim fails for an
    /// order canceled in the meantime, so its released stock is never
    /// decremented. A failed decrement gives the claim back so a
    /// redelivery can try again.
    #[tracing::instrument(skip(self))]
    pub async fn apply_payment_outcome(&self, order_id: OrderId, status: &str) -> Result<()> {
        let requested = parse_requested_status(status)?;
        self.transition(order_id, requested).await?;

        let order = self.get_order_by_id(order_id).await?;
        if requested != OrderStatus::Paid || order.status == OrderStatus::Canceled {
            return Ok(());
        }

        if !self.store_call(self.store.claim_stock_commit(order_id)).await? {
            tracing::debug!("stock already committed or order canceled");
            return Ok(());
        }

        let items: Vec<StockDecrement> = order
            .items
            .iter()
            .map(|item| StockDecrement {
                product_id: item.product_id,
                quantity: item.quantity,
            })
            .collect();

        if let Err(err) = self.stock_call(self.stock.decrement_stock(&items)).await {
            if let Err(revert_err) = self
                .store_call(self.store.revert_stock_commit(order_id))
                .await
            {
                tracing::error!(error = %revert_err, "failed to release stock commit claim");
            }
            return Err(err);
        }
        metrics::counter!("stock_decrements_total").increment(1);

        let released = self
            .store_call(self.store.consume_reservations(order_id))
            .await?;
        tracing::info!(items = items.len(), released, "stock committed for paid order");
        Ok(())
    }
}

fn parse_requested_status(status: &str) -> Result<OrderStatus> {
    let parsed: OrderStatus = status.parse()?;
    if !parsed.is_updatable() {
        return Err(OrderError::InvalidStatus(status.to_string()).into());
    }
    Ok(parsed)
}
