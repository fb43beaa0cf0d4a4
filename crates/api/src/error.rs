//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed caller identity.
    #[error("{0}")]
    Unauthorized(String),
    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),
    /// Resource not found.
    #[error("{0}")]
    NotFound(String),
    /// Error from the order saga.
    #[error(transparent)]
    Saga(#[from] SagaError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Saga(err) => saga_status_code(err),
        }
    }
}

fn saga_status_code(err: &SagaError) -> StatusCode {
    match err {
        SagaError::Validation(_) => StatusCode::BAD_REQUEST,
        SagaError::OrderNotFound(_) | SagaError::ProductNotFound(_) => StatusCode::NOT_FOUND,
        SagaError::Forbidden { .. } => StatusCode::FORBIDDEN,
        SagaError::InsufficientStock { .. }
        | SagaError::InvalidTransition { .. }
        | SagaError::ConcurrentUpdate(_) => StatusCode::CONFLICT,
        SagaError::StockGateway(_) | SagaError::PaymentGateway(_) => StatusCode::BAD_GATEWAY,
        SagaError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        match &self {
            ApiError::Saga(err) if !err.is_client_error() => {
                tracing::error!(status = status.as_u16(), error = %message, "request failed");
            }
            _ => {
                tracing::debug!(status = status.as_u16(), error = %message, "request rejected");
            }
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderId, ProductId, UserId};
    use domain::{OrderError, OrderStatus};
    use order_store::StoreError;

    #[test]
    fn test_saga_errors_map_to_status_codes() {
        let cases = [
            (SagaError::Validation(OrderError::NoItems), StatusCode::BAD_REQUEST),
            (SagaError::OrderNotFound(OrderId::new(1)), StatusCode::NOT_FOUND),
            (
                SagaError::Forbidden {
                    order_id: OrderId::new(1),
                    user_id: UserId::new(2),
                },
                StatusCode::FORBIDDEN,
            ),
            (
                SagaError::InsufficientStock {
                    product_id: ProductId::new(1),
                    requested: 3,
                    available: 1,
                },
                StatusCode::CONFLICT,
            ),
            (
                SagaError::InvalidTransition {
                    from: OrderStatus::Canceled,
                    to: OrderStatus::Paid,
                },
                StatusCode::CONFLICT,
            ),
            (
                SagaError::PaymentGateway("down".to_string()),
                StatusCode::BAD_GATEWAY,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status_code(), expected);
        }
    }

    #[test]
    fn test_client_errors_are_4xx_and_collaborator_errors_are_not() {
        let client = [
            SagaError::Validation(OrderError::NoItems),
            SagaError::OrderNotFound(OrderId::new(1)),
            SagaError::ProductNotFound(ProductId::new(1)),
        ];
        for err in client {
            assert!(err.is_client_error());
            assert!(ApiError::from(err).status_code().is_client_error());
        }

        let collaborator = [
            SagaError::StockGateway("timed out".to_string()),
            SagaError::Store(StoreError::Unavailable("timed out".to_string())),
        ];
        for err in collaborator {
            assert!(!err.is_client_error());
            assert!(ApiError::from(err).status_code().is_server_error());
        }
    }

    #[test]
    fn test_unauthorized_status() {
        let err = ApiError::Unauthorized("missing X-User-Id header".to_string());
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }
}
