//! HTTP API server for the order fulfillment saga.
//!
//! Exposes the order operations of the orchestrator as REST endpoints,
//! with structured logging (tracing) and Prometheus metrics. The binary
//! in `main.rs` also runs the payment-event consumer pool and the
//! reservation reaper next to the server.

pub mod config;
pub mod error;
pub mod identity;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{InMemoryOrderStore, OrderStore};
use saga::{
    InMemoryPaymentGateway, InMemoryStockGateway, OrchestratorConfig, OrderOrchestrator,
    PaymentGateway, StockGateway,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use error::ApiError;
pub use routes::orders::{AppState, Orchestrator};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/orders",
            post(routes::orders::create).get(routes::orders::list),
        )
        .route(
            "/orders/{id}",
            get(routes::orders::get).delete(routes::orders::delete),
        )
        .route("/orders/{id}/cancel", post(routes::orders::cancel))
        .route("/orders/{id}/status", put(routes::orders::update_status))
        .with_state(state)
        .merge(metrics_router)
        .fallback(route_not_found)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

async fn route_not_found() -> ApiError {
    ApiError::NotFound("route not found".to_string())
}

/// Builds the orchestrator over type-erased collaborators.
pub fn build_orchestrator(
    store: Arc<dyn OrderStore>,
    stock: Arc<dyn StockGateway>,
    payment: Arc<dyn PaymentGateway>,
    config: OrchestratorConfig,
) -> Arc<Orchestrator> {
    Arc::new(OrderOrchestrator::with_config(store, stock, payment, config))
}

/// Application state over an in-memory store and the given in-memory gateways.
///
/// Used by tests and by the binary when no database is configured.
pub fn create_in_memory_state(
    stock: InMemoryStockGateway,
    payment: InMemoryPaymentGateway,
) -> Arc<AppState> {
    let orchestrator = build_orchestrator(
        Arc::new(InMemoryOrderStore::new()),
        Arc::new(stock),
        Arc::new(payment),
        OrchestratorConfig::default(),
    );
    AppState::new(orchestrator)
}
