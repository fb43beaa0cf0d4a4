//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use consumer::ConsumerConfig;
use saga::{OrchestratorConfig, ReaperConfig};

/// Log output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:8081`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json` (default `text`)
/// - `DATABASE_URL`: Postgres connection string; unset selects the in-memory store
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default 10)
/// - `STORE_TIMEOUT_MS`: per-operation store timeout, also used as the pool
///   acquire timeout and the Postgres `statement_timeout` (default 2000)
/// - `STOCK_SERVICE_URL`, `PAYMENT_SERVICE_URL`: unset selects in-memory gateways
/// - `GATEWAY_TIMEOUT_MS`: per-call timeout for both gateways (default 3000)
/// - `KAFKA_BROKERS`: unset selects the in-memory broker
/// - `PAYMENT_EVENTS_TOPIC` (default `payment_events`), `CONSUMER_GROUP`
///   (default `order-service`), `CONSUMER_WORKERS` (default 3)
/// - `RESERVATION_TTL_SECS` (default 300), `REAPER_INTERVAL_SECS` (default 60),
///   `REAPER_CANCEL_EXPIRED` (default false)
///
/// Counts and durations must be positive; zero or negative values fall
/// back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub store_timeout: Duration,
    pub stock_service_url: Option<String>,
    pub payment_service_url: Option<String>,
    pub gateway_timeout: Duration,
    pub kafka_brokers: Option<String>,
    pub payment_events_topic: String,
    pub consumer_group: String,
    pub consumer_workers: usize,
    pub reservation_ttl_secs: i64,
    pub reaper_interval: Duration,
    pub reaper_cancel_expired: bool,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// Empty values count as unset; values that fail to parse fall back
    /// to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse_value(get("PORT")).unwrap_or(defaults.port),
            log_level: get("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse_value(get("LOG_FORMAT")).unwrap_or(defaults.log_format),
            database_url: get("DATABASE_URL"),
            database_max_connections: parse_value::<u32>(get("DATABASE_MAX_CONNECTIONS"))
                .filter(|&n| n > 0)
                .unwrap_or(defaults.database_max_connections),
            store_timeout: parse_value::<u64>(get("STORE_TIMEOUT_MS"))
                .filter(|&ms| ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            stock_service_url: get("STOCK_SERVICE_URL"),
            payment_service_url: get("PAYMENT_SERVICE_URL"),
            gateway_timeout: parse_value::<u64>(get("GATEWAY_TIMEOUT_MS"))
                .filter(|&ms| ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.gateway_timeout),
            kafka_brokers: get("KAFKA_BROKERS"),
            payment_events_topic: get("PAYMENT_EVENTS_TOPIC")
                .unwrap_or(defaults.payment_events_topic),
            consumer_group: get("CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            consumer_workers: parse_value::<usize>(get("CONSUMER_WORKERS"))
                .filter(|&n| n > 0)
                .unwrap_or(defaults.consumer_workers),
            reservation_ttl_secs: parse_value::<i64>(get("RESERVATION_TTL_SECS"))
                .filter(|&secs| secs > 0)
                .unwrap_or(defaults.reservation_ttl_secs),
            reaper_interval: parse_value::<u64>(get("REAPER_INTERVAL_SECS"))
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.reaper_interval),
            reaper_cancel_expired: parse_value(get("REAPER_CANCEL_EXPIRED"))
                .unwrap_or(defaults.reaper_cancel_expired),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn reservation_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reservation_ttl_secs)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            gateway_timeout: self.gateway_timeout,
            store_timeout: self.store_timeout,
        }
    }

    pub fn reaper_config(&self) -> ReaperConfig {
        ReaperConfig {
            ttl: self.reservation_ttl(),
            interval: self.reaper_interval,
            cancel_expired: self.reaper_cancel_expired,
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            workers: self.consumer_workers,
            ..ConsumerConfig::default()
        }
    }
}

fn parse_value<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 10,
            store_timeout: Duration::from_millis(2000),
            stock_service_url: None,
            payment_service_url: None,
            gateway_timeout: Duration::from_millis(3000),
            kafka_brokers: None,
            payment_events_topic: "payment_events".to_string(),
            consumer_group: "order-service".to_string(),
            consumer_workers: 3,
            reservation_ttl_secs: order_store::DEFAULT_RESERVATION_TTL_SECS,
            reaper_interval: Duration::from_secs(60),
            reaper_cancel_expired: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8081);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert_eq!(config.consumer_workers, 3);
        assert_eq!(config.payment_events_topic, "payment_events");
        assert_eq!(config.consumer_group, "order-service");
        assert_eq!(config.reservation_ttl(), chrono::Duration::seconds(300));
        assert_eq!(config.store_timeout, Duration::from_secs(2));
        assert!(!config.reaper_cancel_expired);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_lookup_overrides() {
        let config = from_pairs(&[
            ("PORT", "9000"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/orders"),
            ("GATEWAY_TIMEOUT_MS", "250"),
            ("STORE_TIMEOUT_MS", "750"),
            ("CONSUMER_WORKERS", "5"),
            ("RESERVATION_TTL_SECS", "60"),
            ("REAPER_INTERVAL_SECS", "5"),
            ("REAPER_CANCEL_EXPIRED", "true"),
        ]);

        assert_eq!(config.port, 9000);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/orders")
        );
        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.gateway_timeout, Duration::from_millis(250));
        assert_eq!(orchestrator.store_timeout, Duration::from_millis(750));
        assert_eq!(config.consumer_config().workers, 5);

        let reaper = config.reaper_config();
        assert_eq!(reaper.ttl, chrono::Duration::seconds(60));
        assert_eq!(reaper.interval, Duration::from_secs(5));
        assert!(reaper.cancel_expired);
    }

    #[test]
    fn test_invalid_and_empty_values_fall_back() {
        let config = from_pairs(&[("PORT", "not-a-port"), ("KAFKA_BROKERS", "  ")]);
        assert_eq!(config.port, 8081);
        assert!(config.kafka_brokers.is_none());
    }

    #[test]
    fn test_non_positive_values_fall_back() {
        let config = from_pairs(&[
            ("RESERVATION_TTL_SECS", "-30"),
            ("REAPER_INTERVAL_SECS", "0"),
            ("CONSUMER_WORKERS", "0"),
            ("STORE_TIMEOUT_MS", "0"),
        ]);

        assert_eq!(config.reservation_ttl(), chrono::Duration::seconds(300));
        assert_eq!(config.reaper_interval, Duration::from_secs(60));
        assert_eq!(config.consumer_workers, 3);
        assert_eq!(config.store_timeout, Duration::from_secs(2));

        let config = from_pairs(&[("RESERVATION_TTL_SECS", "0")]);
        assert_eq!(config.reaper_config().ttl, chrono::Duration::seconds(300));
    }
}
