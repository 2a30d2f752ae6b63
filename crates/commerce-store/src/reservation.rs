use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::{ProductId, ReservationId};

/// A provisional claim on stock: `quantity` units of a product earmarked
/// until the handle is committed, released, or reclaimed after `expires_at`.
///
/// Expiry keeps abandoned checkouts from locking stock forever; the sweeper
/// treats overdue handles as released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReservation {
    pub id: ReservationId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub expires_at: DateTime<Utc>,
}

impl StockReservation {
    /// Creates a new reservation handle.
    pub fn new(product_id: ProductId, quantity: u32, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: ReservationId::new(),
            product_id,
            quantity,
            expires_at,
        }
    }

    /// Returns true if the handle is overdue for reclaim.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let reservation = StockReservation::new(ProductId::new(), 3, now + Duration::minutes(5));

        assert!(!reservation.is_expired(now));
        assert!(reservation.is_expired(now + Duration::minutes(5)));
        assert!(reservation.is_expired(now + Duration::minutes(10)));
    }
}
