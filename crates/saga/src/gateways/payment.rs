//! Payment gateway trait and in-memory implementation.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::Money;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};

/// A checkout session opened by the payment service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkout {
    pub checkout_url: String,
}

/// Remote payment capability.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a checkout for an order and returns where the customer pays.
    async fn create_checkout(
        &self,
        user_id: UserId,
        order_id: OrderId,
        amount: Money,
    ) -> Result<Checkout>;
}

#[async_trait]
impl<T: PaymentGateway + ?Sized> PaymentGateway for Arc<T> {
    async fn create_checkout(
        &self,
        user_id: UserId,
        order_id: OrderId,
        amount: Money,
    ) -> Result<Checkout> {
        (**self).create_checkout(user_id, order_id, amount).await
    }
}

/// A checkout request recorded by [`InMemoryPaymentGateway`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub user_id: UserId,
    pub order_id: OrderId,
    pub amount: Money,
}

#[derive(Debug)]
struct InMemoryPaymentState {
    base_url: String,
    checkouts: Vec<CheckoutRequest>,
    fail_on_checkout: bool,
    delay: Option<Duration>,
}

impl Default for InMemoryPaymentState {
    fn default() -> Self {
        Self {
            base_url: "https://payments.local/checkout".to_string(),
            checkouts: Vec::new(),
            fail_on_checkout: false,
            delay: None,
        }
    }
}

/// In-memory payment service for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory payment service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the URL prefix of generated checkout links.
    pub fn with_base_url(self, base_url: impl Into<String>) -> Self {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .base_url = base_url.into();
        self
    }

    /// Configures the service to fail checkout requests.
    pub fn set_fail_on_checkout(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_checkout = fail;
    }

    /// Delays every call, to exercise caller timeouts.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).delay = delay;
    }

    /// Returns every successful checkout request, oldest first.
    pub fn checkouts(&self) -> Vec<CheckoutRequest> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .checkouts
            .clone()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_checkout(
        &self,
        user_id: UserId,
        order_id: OrderId,
        amount: Money,
    ) -> Result<Checkout> {
        let delay = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.fail_on_checkout {
            return Err(SagaError::PaymentGateway("Payment provider declined".to_string()));
        }

        state.checkouts.push(CheckoutRequest {
            user_id,
            order_id,
            amount,
        });

        Ok(Checkout {
            checkout_url: format!("{}/{}", state.base_url, order_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_checkout_url_contains_order_id() {
        let gateway = InMemoryPaymentGateway::new().with_base_url("https://pay.test");

        let checkout = gateway
            .create_checkout(UserId::new(7), OrderId::new(42), Money::from_cents(1500))
            .await
            .unwrap();

        assert_eq!(checkout.checkout_url, "https://pay.test/42");
        assert_eq!(
            gateway.checkouts(),
            vec![CheckoutRequest {
                user_id: UserId::new(7),
                order_id: OrderId::new(42),
                amount: Money::from_cents(1500),
            }]
        );
    }

    #[tokio::test]
    async fn test_fail_on_checkout() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.set_fail_on_checkout(true);

        let result = gateway
            .create_checkout(UserId::new(1), OrderId::new(1), Money::from_cents(100))
            .await;

        assert!(matches!(result, Err(SagaError::PaymentGateway(_))));
        assert!(gateway.checkouts().is_empty());
    }
}
