//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::CheckoutError;
use commerce_store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Checkout workflow error.
    Checkout(CheckoutError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Checkout(err) => checkout_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn checkout_error_to_response(err: CheckoutError) -> (StatusCode, String) {
    match &err {
        CheckoutError::EmptyCart | CheckoutError::InvalidQuantity { .. } => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
        CheckoutError::ProductNotFound(_) | CheckoutError::SessionNotFound(_) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        CheckoutError::InsufficientStock { .. } | CheckoutError::SessionClosed { .. } => {
            (StatusCode::CONFLICT, err.to_string())
        }
        // Provider details go to the log, not back to the payer
        CheckoutError::PaymentAuthorizationFailed(_) | CheckoutError::PaymentExecutionFailed(_) => {
            tracing::warn!(error = %err, "payment provider call failed");
            (StatusCode::BAD_GATEWAY, "Payment provider error".to_string())
        }
        CheckoutError::MaterializationFailed { .. } => {
            tracing::error!(error = %err, "checkout failed after payment execution");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Checkout could not be completed".to_string(),
            )
        }
        CheckoutError::Store(StoreError::SessionNotFound(_)) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        CheckoutError::Store(_) => {
            tracing::error!(error = %err, "store error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}
