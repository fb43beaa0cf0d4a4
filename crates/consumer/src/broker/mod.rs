//! Message broker abstraction.
//!
//! A [`Broker`] hands out one [`MessageSource`] per consumer-group member.
//! The broker guarantees that members of the same group own disjoint
//! partition sets at any time; within a partition messages arrive in
//! offset order.

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaBroker, KafkaConfig};
pub use memory::InMemoryBroker;

/// A message read from a topic partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

/// One member's view of a topic within its consumer group.
#[async_trait]
pub trait MessageSource: Send {
    /// Waits up to `timeout` for the next message from an assigned partition.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>>;

    /// Records `message` as processed so the group resumes after it.
    async fn ack(&mut self, message: &Message) -> Result<()>;

    /// Flushes acknowledgments and leaves the group.
    async fn close(&mut self) -> Result<()>;
}

/// Entry point to a topic under a fixed consumer group.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Joins the consumer group as `member`.
    async fn subscribe(&self, member: &str) -> Result<Box<dyn MessageSource>>;
}
