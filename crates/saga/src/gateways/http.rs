//! JSON-over-HTTP adapters for the stock and payment services.

use std::collections::HashMap;

use async_trait::async_trait;
use common::{OrderId, ProductId, UserId};
use domain::Money;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::payment::{Checkout, PaymentGateway};
use super::stock::{StockDecrement, StockGateway, StockInfo};
use crate::error::{Result, SagaError};

#[derive(Serialize)]
struct StockQueryRequest<'a> {
    product_ids: &'a [ProductId],
}

#[derive(Deserialize)]
struct StockQueryResponse {
    products: Vec<ProductStock>,
}

#[derive(Deserialize)]
struct ProductStock {
    product_id: ProductId,
    name: String,
    quantity: u32,
}

#[derive(Serialize)]
struct StockDecrementRequest<'a> {
    items: &'a [StockDecrement],
}

#[derive(Serialize)]
struct CheckoutRequest {
    user_id: UserId,
    order_id: OrderId,
    amount_cents: i64,
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

/// Stock service client.
///
/// `POST {base}/stock/query` answers stock levels for a batch of product
/// ids; `POST {base}/stock/decrement` applies a batched decrement.
#[derive(Debug, Clone)]
pub struct HttpStockGateway {
    client: Client,
    base_url: String,
}

impl HttpStockGateway {
    /// Creates a client for the stock service at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Creates a client that reuses an existing connection pool.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

fn stock_error(err: reqwest::Error) -> SagaError {
    SagaError::StockGateway(err.to_string())
}

#[async_trait]
impl StockGateway for HttpStockGateway {
    #[tracing::instrument(skip(self))]
    async fn get_stock(&self, product_ids: &[ProductId]) -> Result<HashMap<ProductId, StockInfo>> {
        let response: StockQueryResponse = self
            .client
            .post(endpoint(&self.base_url, "stock/query"))
            .json(&StockQueryRequest { product_ids })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(stock_error)?
            .json()
            .await
            .map_err(stock_error)?;

        Ok(response
            .products
            .into_iter()
            .map(|p| {
                (
                    p.product_id,
                    StockInfo {
                        name: p.name,
                        quantity: p.quantity,
                    },
                )
            })
            .collect())
    }

    #[tracing::instrument(skip(self))]
    async fn decrement_stock(&self, items: &[StockDecrement]) -> Result<()> {
        self.client
            .post(endpoint(&self.base_url, "stock/decrement"))
            .json(&StockDecrementRequest { items })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(stock_error)?;

        Ok(())
    }
}

/// Payment service client: `POST {base}/checkout`.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
}

impl HttpPaymentGateway {
    /// Creates a client for the payment service at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Creates a client that reuses an existing connection pool.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

fn payment_error(err: reqwest::Error) -> SagaError {
    SagaError::PaymentGateway(err.to_string())
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[tracing::instrument(skip(self))]
    async fn create_checkout(
        &self,
        user_id: UserId,
        order_id: OrderId,
        amount: Money,
    ) -> Result<Checkout> {
        let request = CheckoutRequest {
            user_id,
            order_id,
            amount_cents: amount.cents(),
        };

        self.client
            .post(endpoint(&self.base_url, "checkout"))
            .json(&request)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(payment_error)?
            .json::<Checkout>()
            .await
            .map_err(payment_error)
    }
}
