//! Checkout error types.

use commerce_store::{SessionState, StoreError};
use common::{ProductId, SessionId};
use thiserror::Error;

/// Errors that can occur while driving a checkout.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The cart has no lines to check out.
    #[error("Cart is empty")]
    EmptyCart,

    /// A product referenced by the checkout does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The requested quantity cannot form an order line.
    #[error("Invalid quantity: {quantity}")]
    InvalidQuantity { quantity: u32 },

    /// A requested quantity exceeds what is currently unreserved.
    #[error("Insufficient stock for product {product_id}: {available} available")]
    InsufficientStock {
        product_id: ProductId,
        available: u32,
    },

    /// The payment provider refused to authorize the payment.
    #[error("Payment authorization failed: {0}")]
    PaymentAuthorizationFailed(String),

    /// The payment provider refused to execute an approved payment.
    #[error("Payment execution failed: {0}")]
    PaymentExecutionFailed(String),

    /// Order materialization failed after the payment executed.
    #[error("Materialization failed for session {session_id}: {reason}")]
    MaterializationFailed {
        session_id: SessionId,
        reason: String,
    },

    /// No checkout session matches the provider payment reference.
    #[error("No checkout session for payment: {0}")]
    SessionNotFound(String),

    /// The session already reached a terminal state.
    #[error("Session {session_id} is already {state}")]
    SessionClosed {
        session_id: SessionId,
        state: SessionState,
    },

    /// Storage error.
    #[error("Store error: {0}")]
    Store(StoreError),
}

// Stock and catalog failures surface under the checkout taxonomy rather
// than as opaque store errors.
impl From<StoreError> for CheckoutError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ProductNotFound(id) => CheckoutError::ProductNotFound(id),
            StoreError::InsufficientStock {
                product_id,
                available,
            } => CheckoutError::InsufficientStock {
                product_id,
                available,
            },
            other => CheckoutError::Store(other),
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;
