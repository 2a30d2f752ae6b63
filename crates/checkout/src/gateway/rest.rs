//! HTTP payment gateway client.
//!
//! Talks to a provider-style payments API:
//!
//! - `POST {base}/payments` registers a payment and returns the payment
//!   ID plus an approval URL
//! - `POST {base}/payments/{id}/execute` captures an approved payment
//!
//! Provider failures are reported under the checkout taxonomy; response
//! bodies never leak beyond the error message.

use async_trait::async_trait;
use common::{ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, Result};
use crate::gateway::{PaymentAuthorization, PaymentGateway, PaymentRequest};

#[derive(Debug, Serialize)]
struct WireItem<'a> {
    product_id: ProductId,
    name: &'a str,
    unit_price_cents: i64,
    quantity: u32,
}

#[derive(Debug, Serialize)]
struct CreatePaymentBody<'a> {
    user_id: UserId,
    items: Vec<WireItem<'a>>,
    total_cents: i64,
    currency: &'a str,
    return_url: &'a str,
    cancel_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatePaymentResponse {
    payment_id: String,
    approval_url: String,
}

#[derive(Debug, Serialize)]
struct ExecutePaymentBody<'a> {
    payer_id: &'a str,
}

/// Payment gateway backed by an HTTP payments API.
#[derive(Debug, Clone)]
pub struct RestGateway {
    client: reqwest::Client,
    base_url: String,
}

impl RestGateway {
    /// Creates a new gateway client for the given API base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Gets the configured API base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn error_message(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        format!("{status}: {body}")
    }
}

#[async_trait]
impl PaymentGateway for RestGateway {
    async fn authorize(&self, request: PaymentRequest) -> Result<PaymentAuthorization> {
        let body = CreatePaymentBody {
            user_id: request.user_id,
            items: request
                .items
                .iter()
                .map(|item| WireItem {
                    product_id: item.product_id,
                    name: &item.name,
                    unit_price_cents: item.unit_price.cents(),
                    quantity: item.quantity,
                })
                .collect(),
            total_cents: request.total.cents(),
            currency: &request.currency,
            return_url: &request.return_url,
            cancel_url: &request.cancel_url,
        };

        let url = format!("{}/payments", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CheckoutError::PaymentAuthorizationFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CheckoutError::PaymentAuthorizationFailed(
                Self::error_message(response).await,
            ));
        }

        let parsed: CreatePaymentResponse = response
            .json()
            .await
            .map_err(|e| CheckoutError::PaymentAuthorizationFailed(e.to_string()))?;

        Ok(PaymentAuthorization {
            provider_ref: parsed.payment_id,
            redirect_url: parsed.approval_url,
        })
    }

    async fn execute(&self, provider_ref: &str, payer_ref: &str) -> Result<()> {
        let url = format!("{}/payments/{}/execute", self.base_url, provider_ref);
        let response = self
            .client
            .post(&url)
            .json(&ExecutePaymentBody {
                payer_id: payer_ref,
            })
            .send()
            .await
            .map_err(|e| CheckoutError::PaymentExecutionFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CheckoutError::PaymentExecutionFailed(
                Self::error_message(response).await,
            ));
        }

        Ok(())
    }
}
