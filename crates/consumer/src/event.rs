use common::OrderId;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Payment-outcome event as published on the payment events topic.
///
/// ```json
/// {"order_id": 42, "status": "paid"}
/// ```
///
/// `status` is kept as received; the orchestrator decides whether it is
/// an acceptable status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub order_id: OrderId,
    pub status: String,
}

impl PaymentEvent {
    pub fn new(order_id: impl Into<OrderId>, status: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            status: status.into(),
        }
    }

    /// Parses a raw message payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Encodes the event as a message payload.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConsumerError;

    #[test]
    fn test_parse_envelope() {
        let event = PaymentEvent::from_payload(br#"{"order_id": 1, "status": "paid"}"#).unwrap();
        assert_eq!(event, PaymentEvent::new(1, "paid"));
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let event =
            PaymentEvent::from_payload(br#"{"order_id": 7, "status": "canceled", "provider": "x"}"#)
                .unwrap();
        assert_eq!(event.order_id, OrderId::new(7));
    }

    #[test]
    fn test_malformed_payloads_fail() {
        let payloads: [&[u8]; 3] = [
            b"not json",
            br#"{"status": "paid"}"#,
            br#"{"order_id": "one", "status": "paid"}"#,
        ];
        for payload in payloads {
            assert!(matches!(
                PaymentEvent::from_payload(payload),
                Err(ConsumerError::Parse(_))
            ));
        }
    }
}
