//! Kafka-backed message source (`kafka` feature).
//!
//! Offsets are stored explicitly after successful handling
//! (`enable.auto.offset.store=false`) and committed in the background by
//! librdkafka's auto-commit, plus one synchronous commit on close.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message as _;

use super::{Broker, Message, MessageSource};
use crate::{ConsumerError, Result};

/// Configuration for the Kafka consumer group.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Topic carrying payment-outcome events.
    pub topic: String,
    /// Consumer group shared by all workers.
    pub group_id: String,
    /// Where a group without committed offsets starts (`earliest` or `latest`).
    pub auto_offset_reset: String,
}

impl KafkaConfig {
    pub fn new(
        bootstrap_servers: impl Into<String>,
        topic: impl Into<String>,
        group_id: impl Into<String>,
    ) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            topic: topic.into(),
            group_id: group_id.into(),
            auto_offset_reset: "earliest".to_string(),
        }
    }

    fn build_consumer_config(&self, member: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("group.id", &self.group_id);
        config.set("client.id", member);
        config.set("enable.auto.commit", "true");
        config.set("enable.auto.offset.store", "false");
        config.set("auto.offset.reset", &self.auto_offset_reset);
        config
    }
}

/// Kafka broker: every subscription is its own consumer in the group.
#[derive(Debug, Clone)]
pub struct KafkaBroker {
    config: KafkaConfig,
}

impl KafkaBroker {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn subscribe(&self, member: &str) -> Result<Box<dyn MessageSource>> {
        let consumer: StreamConsumer = self
            .config
            .build_consumer_config(member)
            .create()
            .map_err(|e| ConsumerError::Broker(format!("Failed to create Kafka consumer: {e}")))?;

        consumer
            .subscribe(&[self.config.topic.as_str()])
            .map_err(|e| ConsumerError::Broker(format!("Failed to subscribe: {e}")))?;

        tracing::info!(
            topic = %self.config.topic,
            group = %self.config.group_id,
            member,
            "subscribed to Kafka topic"
        );

        Ok(Box::new(KafkaSource {
            consumer: Some(consumer),
        }))
    }
}

struct KafkaSource {
    consumer: Option<StreamConsumer>,
}

impl KafkaSource {
    fn consumer(&self) -> Result<&StreamConsumer> {
        self.consumer.as_ref().ok_or(ConsumerError::Closed)
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>> {
        let consumer = self.consumer()?;

        match tokio::time::timeout(timeout, consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(ConsumerError::Broker(e.to_string())),
            Ok(Ok(message)) => Ok(Some(Message {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            })),
        }
    }

    async fn ack(&mut self, message: &Message) -> Result<()> {
        // The stored offset is the next one to consume.
        self.consumer()?
            .store_offset(&message.topic, message.partition, message.offset + 1)
            .map_err(|e| ConsumerError::Broker(format!("Failed to store offset: {e}")))
    }

    async fn close(&mut self) -> Result<()> {
        let Some(consumer) = self.consumer.take() else {
            return Ok(());
        };

        if let Err(e) = consumer.commit_consumer_state(CommitMode::Sync) {
            tracing::warn!(error = %e, "final offset commit failed");
        }
        consumer.unsubscribe();
        Ok(())
    }
}
