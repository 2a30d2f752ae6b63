use serde::{Deserialize, Serialize};

use common::{Money, ProductId};

/// One frozen cart line: the product, its name and unit price as they were
/// at snapshot time, and the requested quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLine {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Money,
    pub quantity: u32,
}

impl SnapshotLine {
    /// Creates a new snapshot line.
    pub fn new(
        product_id: ProductId,
        name: impl Into<String>,
        unit_price: Money,
        quantity: u32,
    ) -> Self {
        Self {
            product_id,
            name: name.into(),
            unit_price,
            quantity,
        }
    }

    /// Returns the total price for this line (unit price * quantity).
    pub fn total_price(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// An immutable, point-in-time copy of a user's cart taken when checkout
/// begins.
///
/// Decouples checkout processing from concurrent edits to the live cart:
/// the lines are fixed once the snapshot exists and are only read from then
/// on. Each snapshot is owned by exactly one payment session; a restarted
/// checkout takes a fresh snapshot rather than mutating this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSnapshot {
    lines: Vec<SnapshotLine>,
}

impl CartSnapshot {
    /// Creates a snapshot from an ordered sequence of lines.
    pub fn new(lines: Vec<SnapshotLine>) -> Self {
        Self { lines }
    }

    /// Returns the frozen lines in their original order.
    pub fn lines(&self) -> &[SnapshotLine] {
        &self.lines
    }

    /// Returns the number of lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns true if the snapshot has no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Returns the checkout total across all lines.
    pub fn total(&self) -> Money {
        self.lines.iter().map(SnapshotLine::total_price).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_line_snapshot() -> CartSnapshot {
        CartSnapshot::new(vec![
            SnapshotLine::new(ProductId::new(), "Widget", Money::from_cents(1000), 2),
            SnapshotLine::new(ProductId::new(), "Gadget", Money::from_cents(500), 1),
        ])
    }

    #[test]
    fn test_line_total_price() {
        let line = SnapshotLine::new(ProductId::new(), "Widget", Money::from_cents(1000), 3);
        assert_eq!(line.total_price(), Money::from_cents(3000));
    }

    #[test]
    fn test_snapshot_total_sums_lines() {
        let snapshot = two_line_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.total(), Money::from_cents(2500));
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = CartSnapshot::new(vec![]);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.total(), Money::zero());
    }

    #[test]
    fn test_snapshot_serialization_roundtrip() {
        let snapshot = two_line_snapshot();
        let json = serde_json::to_value(&snapshot).unwrap();
        let back: CartSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_lines_keep_their_order() {
        let snapshot = two_line_snapshot();
        assert_eq!(snapshot.lines()[0].name, "Widget");
        assert_eq!(snapshot.lines()[1].name, "Gadget");
    }
}
