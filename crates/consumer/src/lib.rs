//! Payment-outcome event consumers.
//!
//! A [`ConsumerPool`] runs a fixed number of [`Worker`]s under one
//! consumer group. Each worker owns a disjoint set of partitions, handles
//! its messages one at a time and acknowledges a message only after it
//! has been applied, giving at-least-once processing. The
//! [`PaymentEventHandler`] applies each event through the order
//! orchestrator, which makes repeated deliveries harmless.

pub mod broker;
pub mod error;
pub mod event;
pub mod handler;
pub mod pool;
pub mod worker;

#[cfg(feature = "kafka")]
pub use broker::{KafkaBroker, KafkaConfig};
pub use broker::{Broker, InMemoryBroker, Message, MessageSource};
pub use error::{ConsumerError, Result};
pub use event::PaymentEvent;
pub use handler::{EventHandler, PaymentEventHandler};
pub use pool::{ConsumerConfig, ConsumerPool};
pub use worker::{Worker, WorkerReport};
