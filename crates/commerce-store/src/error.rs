use thiserror::Error;

use common::{ProductId, ReservationId, SessionId};

use crate::SessionState;

/// Errors that can occur when interacting with the commerce store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The product does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// Not enough unreserved stock to satisfy the requested quantity.
    /// `available` is the quantity that could still be claimed.
    #[error("Insufficient stock for product {product_id}: {available} available")]
    InsufficientStock {
        product_id: ProductId,
        available: u32,
    },

    /// The payment session does not exist.
    #[error("Payment session not found: {0}")]
    SessionNotFound(SessionId),

    /// A session transition was attempted from an incompatible state.
    #[error("Session {session_id} cannot move to {attempted} from {actual}")]
    SessionStateConflict {
        session_id: SessionId,
        attempted: SessionState,
        actual: SessionState,
    },

    /// The reservation handle does not exist (already committed, released,
    /// or reclaimed).
    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// A stored session state column holds a value this build does not know.
    #[error("Unrecognized session state in storage: {0}")]
    UnknownSessionState(String),

    /// A stored checkout kind column holds a value this build does not know.
    #[error("Unrecognized checkout kind in storage: {0}")]
    UnknownCheckoutKind(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for commerce store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
