//! Payment gateway trait and implementations.
//!
//! The gateway follows an authorize-then-execute flow: `authorize`
//! registers the payment with the provider and yields a redirect URL for
//! payer approval, and `execute` captures the money once the provider's
//! callback confirms approval.

pub mod memory;
pub mod rest;

pub use memory::InMemoryGateway;
pub use rest::RestGateway;

use async_trait::async_trait;
use common::{Money, ProductId, UserId};

use crate::error::Result;

/// One purchasable line sent to the payment provider.
#[derive(Debug, Clone)]
pub struct PaymentItem {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Money,
    pub quantity: u32,
}

/// A payment authorization request.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    /// Correlation token tying the provider payment back to the buyer.
    pub user_id: UserId,
    pub items: Vec<PaymentItem>,
    pub total: Money,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Where the provider sends the payer after approval.
    pub return_url: String,
    /// Where the provider sends the payer on cancellation.
    pub cancel_url: String,
}

/// Result of a successful authorization.
#[derive(Debug, Clone)]
pub struct PaymentAuthorization {
    /// The payment ID assigned by the provider.
    pub provider_ref: String,
    /// The provider page the payer must approve the payment on.
    pub redirect_url: String,
}

/// Trait for payment provider operations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Registers a payment with the provider for payer approval.
    async fn authorize(&self, request: PaymentRequest) -> Result<PaymentAuthorization>;

    /// Executes a previously approved payment.
    async fn execute(&self, provider_ref: &str, payer_ref: &str) -> Result<()>;
}
