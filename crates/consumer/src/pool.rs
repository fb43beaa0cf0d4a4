//! Fixed-size pool of consumer workers sharing one consumer group.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::task::JoinHandle;

use crate::Result;
use crate::broker::Broker;
use crate::handler::EventHandler;
use crate::worker::{Worker, WorkerReport};

/// Consumer pool settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Number of workers joining the group.
    pub workers: usize,
    /// How long one poll waits for a message; bounds the stop latency.
    pub poll_timeout: Duration,
    /// Worker names are `{member_prefix}-{index}`.
    pub member_prefix: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            poll_timeout: Duration::from_millis(200),
            member_prefix: "payment-consumer".to_string(),
        }
    }
}

/// Running consumer workers.
///
/// Workers share no state; partition ownership is decided by the broker.
pub struct ConsumerPool {
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<WorkerReport>>,
}

impl ConsumerPool {
    /// Subscribes `config.workers` members and starts one task per member.
    ///
    /// If a subscription fails, the workers already started are stopped
    /// before the error is returned.
    pub async fn start<B, H>(broker: &B, handler: Arc<H>, config: ConsumerConfig) -> Result<Self>
    where
        B: Broker + ?Sized,
        H: EventHandler + 'static,
    {
        let mut pool = Self {
            stop: Arc::new(AtomicBool::new(false)),
            workers: Vec::with_capacity(config.workers),
        };

        for index in 0..config.workers {
            let name = format!("{}-{index}", config.member_prefix);
            let source = match broker.subscribe(&name).await {
                Ok(source) => source,
                Err(err) => {
                    pool.stop().await;
                    return Err(err);
                }
            };

            let worker = Worker::new(
                name,
                source,
                Arc::clone(&handler),
                Arc::clone(&pool.stop),
                config.poll_timeout,
            );
            pool.workers.push(tokio::spawn(worker.run()));
        }

        tracing::info!(workers = config.workers, "consumer pool started");
        Ok(pool)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Raises the stop flag and waits for every worker to finish its
    /// current message, flush acknowledgments and leave the group.
    pub async fn stop(self) -> WorkerReport {
        self.stop.store(true, Ordering::Release);

        let mut total = WorkerReport::default();
        for result in join_all(self.workers).await {
            match result {
                Ok(report) => total = total + report,
                Err(err) => tracing::error!(error = %err, "consumer worker panicked"),
            }
        }

        tracing::info!(
            processed = total.processed,
            failed = total.failed,
            "consumer pool stopped"
        );
        total
    }
}
