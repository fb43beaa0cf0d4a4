//! API server entry point.
//!
//! Wires the store, gateways, orchestrator, payment-event consumers and
//! reservation reaper, then serves HTTP until SIGINT/SIGTERM.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use consumer::{Broker, ConsumerPool, InMemoryBroker, PaymentEventHandler};
use order_store::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use saga::{
    HttpPaymentGateway, HttpStockGateway, InMemoryPaymentGateway, InMemoryStockGateway,
    PaymentGateway, ReservationReaper, StockGateway,
};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn build_store(config: &Config) -> Arc<dyn OrderStore> {
    let ttl = config.reservation_ttl();
    match &config.database_url {
        Some(url) => {
            let statement_timeout_ms = config.store_timeout.as_millis();
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .acquire_timeout(config.store_timeout)
                .after_connect(move |conn, _meta| {
                    Box::pin(async move {
                        let sql = format!("SET statement_timeout = {statement_timeout_ms}");
                        sqlx::query(&sql).execute(conn).await?;
                        Ok(())
                    })
                })
                .connect(url)
                .await
                .expect("failed to connect to Postgres");
            let store = PostgresOrderStore::new(pool).with_reservation_ttl(ttl);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using Postgres order store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, orders are kept in memory");
            Arc::new(InMemoryOrderStore::new().with_reservation_ttl(ttl))
        }
    }
}

fn build_stock_gateway(config: &Config) -> Arc<dyn StockGateway> {
    match &config.stock_service_url {
        Some(url) => Arc::new(HttpStockGateway::new(url)),
        None => {
            tracing::warn!("STOCK_SERVICE_URL not set, using an empty in-memory stock service");
            Arc::new(InMemoryStockGateway::new())
        }
    }
}

fn build_payment_gateway(config: &Config) -> Arc<dyn PaymentGateway> {
    match &config.payment_service_url {
        Some(url) => Arc::new(HttpPaymentGateway::new(url)),
        None => {
            tracing::warn!("PAYMENT_SERVICE_URL not set, using the in-memory payment service");
            Arc::new(InMemoryPaymentGateway::new())
        }
    }
}

#[cfg(feature = "kafka")]
fn build_broker(config: &Config) -> Box<dyn Broker> {
    use consumer::{KafkaBroker, KafkaConfig};

    match &config.kafka_brokers {
        Some(brokers) => Box::new(KafkaBroker::new(KafkaConfig::new(
            brokers.as_str(),
            config.payment_events_topic.as_str(),
            config.consumer_group.as_str(),
        ))),
        None => in_memory_broker(config),
    }
}

#[cfg(not(feature = "kafka"))]
fn build_broker(config: &Config) -> Box<dyn Broker> {
    if config.kafka_brokers.is_some() {
        tracing::warn!("KAFKA_BROKERS is set but the kafka feature is disabled");
    }
    in_memory_broker(config)
}

fn in_memory_broker(config: &Config) -> Box<dyn Broker> {
    tracing::warn!("using the in-memory broker, no payment events will arrive from outside");
    Box::new(InMemoryBroker::new(
        config.payment_events_topic.as_str(),
        config.consumer_group.as_str(),
        config.consumer_workers.max(1),
    ))
}

#[tokio::main]
async fn main() {
    // 1. Configuration and tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Store, gateways and orchestrator
    let store = build_store(&config).await;
    let orchestrator = api::build_orchestrator(
        Arc::clone(&store),
        build_stock_gateway(&config),
        build_payment_gateway(&config),
        config.orchestrator_config(),
    );

    // 4. Payment-event consumers
    let broker = build_broker(&config);
    let handler = Arc::new(PaymentEventHandler::new(Arc::clone(&orchestrator)));
    let pool = ConsumerPool::start(broker.as_ref(), handler, config.consumer_config())
        .await
        .expect("failed to start consumer pool");

    // 5. Reservation reaper
    let reaper = ReservationReaper::new(store, config.reaper_config()).spawn();

    // 6. Serve until shutdown
    let app = api::create_app(api::AppState::new(orchestrator), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 7. Stop consumers (flushes acks), then the reaper
    pool.stop().await;
    reaper.stop().await;

    tracing::info!("server shut down gracefully");
}
