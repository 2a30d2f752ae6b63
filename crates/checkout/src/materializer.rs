//! Order materialization planning.

use chrono::{DateTime, Utc};
use commerce_store::{CheckoutCommit, CheckoutKind, Order, PaymentSession};

/// Builds the commit that turns an approved session into orders.
///
/// Every snapshot line becomes one order row carrying the session's
/// stored payment reference and the callback's payer reference. Cart
/// checkouts also clear the purchased lines from the cart; direct
/// product checkouts leave the cart alone.
pub fn plan_checkout(
    session: &PaymentSession,
    payment_ref: &str,
    payer_ref: &str,
    now: DateTime<Utc>,
) -> CheckoutCommit {
    let orders = session
        .snapshot
        .lines()
        .iter()
        .map(|line| {
            Order::new(
                session.user_id,
                line.product_id,
                line.quantity,
                line.total_price(),
                payment_ref.to_string(),
                payer_ref.to_string(),
                now,
            )
        })
        .collect();

    CheckoutCommit {
        session_id: session.id,
        user_id: session.user_id,
        clear_cart: session.kind == CheckoutKind::Cart,
        orders,
    }
}
