//! Single consumer-group member processing messages sequentially.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::broker::{Message, MessageSource};
use crate::handler::EventHandler;
use crate::{ConsumerError, PaymentEvent};

/// Counts of what a worker did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Messages handled and acknowledged.
    pub processed: u64,
    /// Messages that could not be parsed or handled; left unacknowledged.
    pub failed: u64,
}

impl std::ops::Add for WorkerReport {
    type Output = WorkerReport;

    fn add(self, rhs: Self) -> Self::Output {
        WorkerReport {
            processed: self.processed + rhs.processed,
            failed: self.failed + rhs.failed,
        }
    }
}

/// Polls one message source and hands each message to the handler.
///
/// Messages are processed one at a time. The stop flag is checked once
/// per poll iteration, so a message in flight always finishes before the
/// worker exits.
pub struct Worker<H: EventHandler> {
    name: String,
    source: Box<dyn MessageSource>,
    handler: Arc<H>,
    stop: Arc<AtomicBool>,
    poll_timeout: Duration,
    report: WorkerReport,
}

impl<H: EventHandler> Worker<H> {
    pub fn new(
        name: impl Into<String>,
        source: Box<dyn MessageSource>,
        handler: Arc<H>,
        stop: Arc<AtomicBool>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            handler,
            stop,
            poll_timeout,
            report: WorkerReport::default(),
        }
    }

    /// Runs until the stop flag is raised or the source closes, then
    /// flushes acknowledgments and leaves the group.
    #[tracing::instrument(skip(self), fields(worker = %self.name))]
    pub async fn run(mut self) -> WorkerReport {
        tracing::info!("consumer worker started");

        while !self.stop.load(Ordering::Acquire) {
            match self.source.poll(self.poll_timeout).await {
                Ok(Some(message)) => self.process(&message).await,
                Ok(None) => {}
                Err(ConsumerError::Closed) => break,
                Err(err) => {
                    tracing::error!(error = %err, "poll failed");
                    tokio::time::sleep(self.poll_timeout).await;
                }
            }
        }

        if let Err(err) = self.source.close().await {
            tracing::warn!(error = %err, "failed to close message source");
        }

        tracing::info!(
            processed = self.report.processed,
            failed = self.report.failed,
            "consumer worker stopped"
        );
        self.report
    }

    async fn process(&mut self, message: &Message) {
        let event = match PaymentEvent::from_payload(&message.payload) {
            Ok(event) => event,
            Err(err) => {
                self.fail("parse");
                tracing::warn!(
                    partition = message.partition,
                    offset = message.offset,
                    error = %err,
                    "skipping malformed payment event"
                );
                return;
            }
        };

        if let Err(err) = self.handler.handle(&event).await {
            self.fail("handler");
            tracing::error!(
                partition = message.partition,
                offset = message.offset,
                order_id = %event.order_id,
                status = %event.status,
                error = %err,
                "payment event not applied, leaving it unacknowledged"
            );
            return;
        }

        if let Err(err) = self.source.ack(message).await {
            tracing::error!(
                partition = message.partition,
                offset = message.offset,
                error = %err,
                "failed to acknowledge payment event"
            );
        }

        self.report.processed += 1;
        metrics::counter!("payment_events_processed_total").increment(1);
        tracing::debug!(
            partition = message.partition,
            offset = message.offset,
            order_id = %event.order_id,
            status = %event.status,
            "payment event applied"
        );
    }

    fn fail(&mut self, reason: &'static str) {
        self.report.failed += 1;
        metrics::counter!("payment_events_failed_total", "reason" => reason).increment(1);
    }
}
