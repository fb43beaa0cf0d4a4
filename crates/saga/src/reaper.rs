//! Periodic release of stock reservations held by abandoned orders.

use std::time::Duration;

use common::OrderId;
use domain::OrderStatus;
use order_store::{OrderStore, default_reservation_ttl};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::Result;

/// Reaper settings.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Reservations at least this old are released.
    pub ttl: chrono::Duration,
    /// Time between two sweeps.
    pub interval: Duration,
    /// Also cancel orders that are still `pending` once their reservations expire.
    pub cancel_expired: bool,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            ttl: default_reservation_ttl(),
            interval: Duration::from_secs(60),
            cancel_expired: false,
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Orders that lost at least one reservation.
    pub expired_orders: Vec<OrderId>,
    /// Orders moved from `pending` to `canceled` by this sweep.
    pub canceled_orders: Vec<OrderId>,
}

/// Sweeps expired reservations out of the order store on a fixed interval.
pub struct ReservationReaper<S: OrderStore> {
    store: S,
    config: ReaperConfig,
}

impl<S: OrderStore + 'static> ReservationReaper<S> {
    pub fn new(store: S, config: ReaperConfig) -> Self {
        Self { store, config }
    }

    /// Runs a single sweep.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let expired_orders = self.store.clear_expired_reservations(self.config.ttl).await?;
        if expired_orders.is_empty() {
            return Ok(SweepReport::default());
        }

        metrics::counter!("reservations_expired_total").increment(expired_orders.len() as u64);
        tracing::info!(orders = expired_orders.len(), "released expired reservations");

        let mut canceled_orders = Vec::new();
        if self.config.cancel_expired {
            for &order_id in &expired_orders {
                match self.cancel_if_pending(order_id).await {
                    Ok(true) => canceled_orders.push(order_id),
                    Ok(false) => {}
                    Err(err) => {
                        tracing::warn!(%order_id, error = %err, "failed to cancel expired order");
                    }
                }
            }
        }

        Ok(SweepReport {
            expired_orders,
            canceled_orders,
        })
    }

    async fn cancel_if_pending(&self, order_id: OrderId) -> Result<bool> {
        let pending = matches!(
            self.store.get_by_id(order_id).await?,
            Some(order) if order.status == OrderStatus::Pending
        );
        if !pending {
            return Ok(false);
        }

        let canceled = self
            .store
            .update_status(order_id, OrderStatus::Pending, OrderStatus::Canceled)
            .await?;
        if canceled {
            metrics::counter!(
                "order_status_updates_total",
                "status" => OrderStatus::Canceled.as_str()
            )
            .increment(1);
            tracing::info!(%order_id, "canceled order with expired reservations");
        }
        Ok(canceled)
    }

    /// Sweeps every `interval` until `shutdown` flips to true or its sender
    /// is dropped. A failed sweep is logged and retried on the next tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_once().await {
                        tracing::error!(error = %err, "reservation sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("reservation reaper stopped");
    }

    /// Starts the reaper on the runtime and returns a handle to stop it.
    pub fn spawn(self) -> ReaperHandle {
        let (shutdown, receiver) = watch::channel(false);
        let task = tokio::spawn(self.run(receiver));
        ReaperHandle { shutdown, task }
    }
}

/// Handle to a running [`ReservationReaper`].
pub struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signals the reaper to stop and waits for the current sweep to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            tracing::error!(error = %err, "reservation reaper task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ProductId, UserId};
    use domain::{Money, NewOrder, OrderLine};
    use order_store::{InMemoryOrderStore, StockLevels};

    async fn create_order(store: &InMemoryOrderStore, user: i64) -> OrderId {
        let item = OrderLine::new(1, 1, Money::from_cents(100)).into_line_item("Widget");
        let stock: StockLevels = [(ProductId::new(1), 100)].into_iter().collect();
        store
            .create(
                NewOrder::new(UserId::new(user), vec![item], Money::from_cents(100)),
                &stock,
            )
            .await
            .unwrap()
            .id
    }

    fn config(cancel_expired: bool) -> ReaperConfig {
        ReaperConfig {
            ttl: chrono::Duration::minutes(5),
            interval: Duration::from_millis(10),
            cancel_expired,
        }
    }

    #[tokio::test]
    async fn test_sweep_releases_only_expired() {
        let store = InMemoryOrderStore::new();
        let old = create_order(&store, 1).await;
        let fresh = create_order(&store, 2).await;
        store.age_reservations(old, chrono::Duration::minutes(6)).await;

        let reaper = ReservationReaper::new(store.clone(), config(false));
        let report = reaper.sweep_once().await.unwrap();

        assert_eq!(report.expired_orders, vec![old]);
        assert!(report.canceled_orders.is_empty());
        assert_eq!(store.reservations_for_order(fresh).await.unwrap().len(), 1);

        let order = store.get_by_id(old).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_sweep_cancels_pending_orders_when_enabled() {
        let store = InMemoryOrderStore::new();
        let pending = create_order(&store, 1).await;
        let paid = create_order(&store, 2).await;
        store
            .update_status(paid, OrderStatus::Pending, OrderStatus::Paid)
            .await
            .unwrap();
        store.age_reservations(pending, chrono::Duration::minutes(10)).await;
        store.age_reservations(paid, chrono::Duration::minutes(10)).await;

        let reaper = ReservationReaper::new(store.clone(), config(true));
        let report = reaper.sweep_once().await.unwrap();

        assert_eq!(report.expired_orders, vec![pending, paid]);
        assert_eq!(report.canceled_orders, vec![pending]);
        assert_eq!(
            store.get_by_id(paid).await.unwrap().unwrap().status,
            OrderStatus::Paid
        );
    }

    #[tokio::test]
    async fn test_spawned_reaper_sweeps_and_stops() {
        let store = InMemoryOrderStore::new();
        let old = create_order(&store, 1).await;
        store.age_reservations(old, chrono::Duration::minutes(6)).await;

        let handle = ReservationReaper::new(store.clone(), config(false)).spawn();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await;

        assert_eq!(store.reservation_count().await, 0);
    }
}
