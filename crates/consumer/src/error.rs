//! Consumer error types.

use saga::SagaError;
use thiserror::Error;

/// Errors raised while consuming payment-outcome events.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The message payload is not a valid payment event.
    #[error("Invalid payment event: {0}")]
    Parse(#[from] serde_json::Error),

    /// Applying the event to the order failed.
    #[error("Handler error: {0}")]
    Handler(#[from] SagaError),

    /// The message broker refused an operation.
    #[error("Broker error: {0}")]
    Broker(String),

    /// The message source has been closed.
    #[error("Message source is closed")]
    Closed,
}

/// Result type for consumer operations.
pub type Result<T> = std::result::Result<T, ConsumerError>;
