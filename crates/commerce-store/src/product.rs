use serde::{Deserialize, Serialize};

use common::{Money, ProductId, UserId};

/// A catalog product together with its authoritative stock counters.
///
/// `quantity` is the stored stock; `reserved` is the sum of all open
/// reservation earmarks. Stock available for sale is the difference.
/// `quantity` changes only through a committed reservation or a checkout
/// commit, `reserved` only through reserve/release/reclaim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub unit_price: Money,
    pub quantity: u32,
    pub reserved: u32,
}

impl Product {
    /// Creates a new product with no open earmarks.
    pub fn new(name: impl Into<String>, unit_price: Money, quantity: u32) -> Self {
        Self {
            id: ProductId::new(),
            name: name.into(),
            unit_price,
            quantity,
            reserved: 0,
        }
    }

    /// Units that can still be sold or earmarked.
    pub fn available(&self) -> u32 {
        self.quantity.saturating_sub(self.reserved)
    }
}

/// One live cart entry: a user wants `quantity` units of a product.
///
/// At most one line exists per (user, product) pair. A cart line is
/// advisory only; it holds no stock until checkout commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
}

impl CartLine {
    /// Creates a new cart line.
    pub fn new(user_id: UserId, product_id: ProductId, quantity: u32) -> Self {
        Self {
            user_id,
            product_id,
            quantity,
        }
    }
}
