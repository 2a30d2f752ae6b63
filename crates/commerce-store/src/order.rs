use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::{Money, OrderId, ProductId, UserId};

/// Permanent record of one purchased line.
///
/// Append-only and audit-grade: created by checkout materialization once
/// payment is confirmed, never updated or deleted afterwards. The payment
/// and payer references tie the row back to the external authority's
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
    /// Unit price at snapshot time multiplied by quantity.
    pub total: Money,
    pub payment_ref: String,
    pub payer_ref: String,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Creates a new order record.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
        total: Money,
        payment_ref: impl Into<String>,
        payer_ref: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OrderId::new(),
            user_id,
            product_id,
            quantity,
            total,
            payment_ref: payment_ref.into(),
            payer_ref: payer_ref.into(),
            created_at,
        }
    }
}
