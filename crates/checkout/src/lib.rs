//! Checkout orchestration for the storefront.
//!
//! This crate drives a payment-approval checkout against a commerce
//! store and an external payment provider:
//! 1. Freeze a priced snapshot of what is being bought
//! 2. Persist a payment session carrying that snapshot
//! 3. Validate stock and authorize the payment with the provider
//! 4. Redirect the payer to the provider's approval page
//! 5. On the approval callback, execute the payment and materialize
//!    orders, stock decrements, and cart cleanup in one transaction
//!
//! Sessions that never come back from the provider are abandoned by a
//! periodic sweep rather than left holding state forever.

pub mod error;
pub mod flow;
pub mod gateway;
pub mod materializer;
pub mod snapshot;

pub use error::{CheckoutError, Result};
pub use flow::{CheckoutConfig, CheckoutFlow, CheckoutReceipt, CheckoutRedirect, SweepReport};
pub use gateway::{
    InMemoryGateway, PaymentAuthorization, PaymentGateway, PaymentItem, PaymentRequest,
    RestGateway,
};
