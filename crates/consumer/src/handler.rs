//! Event handlers invoked by consumer workers.

use std::sync::Arc;

use async_trait::async_trait;
use order_store::OrderStore;
use saga::{OrderOrchestrator, PaymentGateway, StockGateway};

use crate::{PaymentEvent, Result};

/// Applies one decoded payment event.
///
/// Implementations must tolerate the same event being delivered more than once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &PaymentEvent) -> Result<()>;
}

/// Drives the asynchronous leg of the order saga through the orchestrator.
pub struct PaymentEventHandler<S, St, P>
where
    S: OrderStore,
    St: StockGateway,
    P: PaymentGateway,
{
    orchestrator: Arc<OrderOrchestrator<S, St, P>>,
}

impl<S, St, P> PaymentEventHandler<S, St, P>
where
    S: OrderStore,
    St: StockGateway,
    P: PaymentGateway,
{
    pub fn new(orchestrator: Arc<OrderOrchestrator<S, St, P>>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl<S, St, P> EventHandler for PaymentEventHandler<S, St, P>
where
    S: OrderStore,
    St: StockGateway,
    P: PaymentGateway,
{
    async fn handle(&self, event: &PaymentEvent) -> Result<()> {
        self.orchestrator
            .apply_payment_outcome(event.order_id, &event.status)
            .await?;
        Ok(())
    }
}
