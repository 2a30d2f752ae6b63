//! Cart snapshot construction.
//!
//! A checkout operates on an immutable copy of the cart taken when the
//! checkout begins. Later cart edits never change what an in-flight
//! payment charges for or what materialization produces.

use commerce_store::{CartSnapshot, CommerceStore, CommerceStoreExt, SnapshotLine};
use common::{ProductId, UserId};

use crate::error::{CheckoutError, Result};

/// Copies the user's cart into a snapshot, capturing current names and
/// unit prices.
pub async fn snapshot_cart<S: CommerceStore>(store: &S, user_id: UserId) -> Result<CartSnapshot> {
    let lines = store.cart_lines(user_id).await?;
    if lines.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }

    let mut snapshot_lines = Vec::with_capacity(lines.len());
    for line in lines {
        let product = store.fetch_product(line.product_id).await?;
        snapshot_lines.push(SnapshotLine::new(
            product.id,
            product.name,
            product.unit_price,
            line.quantity,
        ));
    }

    Ok(CartSnapshot::new(snapshot_lines))
}

/// Builds a single-line snapshot for a direct product purchase.
pub async fn snapshot_product<S: CommerceStore>(
    store: &S,
    product_id: ProductId,
    quantity: u32,
) -> Result<CartSnapshot> {
    if quantity == 0 {
        return Err(CheckoutError::InvalidQuantity { quantity });
    }

    let product = store.fetch_product(product_id).await?;
    Ok(CartSnapshot::new(vec![SnapshotLine::new(
        product.id,
        product.name,
        product.unit_price,
        quantity,
    )]))
}
