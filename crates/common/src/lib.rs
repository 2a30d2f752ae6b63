//! Shared primitive types for the storefront checkout service.
//!
//! Every entity identifier is a distinct UUID newtype so that a product id
//! can never be passed where a session id is expected, and all currency
//! amounts move through [`Money`] in integer cents.

pub mod money;
pub mod types;

pub use money::Money;
pub use types::{OrderId, ProductId, ReservationId, SessionId, UserId};
