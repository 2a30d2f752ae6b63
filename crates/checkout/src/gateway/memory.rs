//! In-memory payment gateway for testing.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::Money;

use crate::error::{CheckoutError, Result};
use crate::gateway::{PaymentAuthorization, PaymentGateway, PaymentRequest};

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    authorized: HashMap<String, Money>,
    executed: HashMap<String, String>,
    next_id: u32,
    fail_on_authorize: bool,
    fail_on_execute: bool,
}

/// In-memory payment gateway for testing.
///
/// Assigns sequential `PAY-nnnn` references and tracks which payments
/// have been executed. Executing an already executed payment is a no-op.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryGateway {
    /// Creates a new in-memory gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the gateway to refuse authorization calls.
    pub fn set_fail_on_authorize(&self, fail: bool) {
        self.state.write().unwrap().fail_on_authorize = fail;
    }

    /// Configures the gateway to refuse execution calls.
    pub fn set_fail_on_execute(&self, fail: bool) {
        self.state.write().unwrap().fail_on_execute = fail;
    }

    /// Returns the number of authorized payments.
    pub fn payment_count(&self) -> usize {
        self.state.read().unwrap().authorized.len()
    }

    /// Returns the number of executed payments.
    pub fn executed_count(&self) -> usize {
        self.state.read().unwrap().executed.len()
    }

    /// Returns the total authorized for the given payment, if it exists.
    pub fn authorized_total(&self, provider_ref: &str) -> Option<Money> {
        self.state.read().unwrap().authorized.get(provider_ref).copied()
    }

    /// Returns true if the payment was executed.
    pub fn is_executed(&self, provider_ref: &str) -> bool {
        self.state.read().unwrap().executed.contains_key(provider_ref)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    async fn authorize(&self, request: PaymentRequest) -> Result<PaymentAuthorization> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_authorize {
            return Err(CheckoutError::PaymentAuthorizationFailed(
                "Payment declined".to_string(),
            ));
        }

        state.next_id += 1;
        let provider_ref = format!("PAY-{:04}", state.next_id);
        state.authorized.insert(provider_ref.clone(), request.total);

        let redirect_url = format!("https://payments.example/approve/{provider_ref}");
        Ok(PaymentAuthorization {
            provider_ref,
            redirect_url,
        })
    }

    async fn execute(&self, provider_ref: &str, payer_ref: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();

        if !state.authorized.contains_key(provider_ref) {
            return Err(CheckoutError::PaymentExecutionFailed(format!(
                "Unknown payment: {provider_ref}"
            )));
        }

        if state.fail_on_execute {
            return Err(CheckoutError::PaymentExecutionFailed(
                "Payment declined".to_string(),
            ));
        }

        state
            .executed
            .insert(provider_ref.to_string(), payer_ref.to_string());
        Ok(())
    }
}
