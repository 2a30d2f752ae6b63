use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::{ProductId, ReservationId, SessionId, UserId};

use crate::{
    CartLine, Order, PaymentSession, Product, Result, StockReservation, StoreError,
};

/// Instruction set for atomically finalizing one confirmed checkout.
///
/// Built by the materializer from a session's stored snapshot; every stock
/// decrement is derived from the order rows, never from caller-supplied
/// line items.
#[derive(Debug, Clone)]
pub struct CheckoutCommit {
    pub session_id: SessionId,
    pub user_id: UserId,
    /// Delete the purchased live cart lines (cart checkout) or leave the
    /// cart untouched (direct product checkout).
    pub clear_cart: bool,
    /// One order per snapshot line.
    pub orders: Vec<Order>,
}

/// Core trait for commerce storage backends.
///
/// The store is the single shared mutable resource between concurrent
/// checkouts. Implementations must serialize stock mutation per product
/// (guarded conditional updates, not read-then-write) and must be
/// thread-safe (Send + Sync).
#[async_trait]
pub trait CommerceStore: Send + Sync {
    /// Inserts a product, replacing an existing row with the same id.
    async fn insert_product(&self, product: &Product) -> Result<()>;

    /// Retrieves a product by id. Returns None if it doesn't exist.
    async fn product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Creates or replaces the cart line for (user, product).
    ///
    /// At most one live line exists per pair; an upsert replaces the
    /// requested quantity.
    async fn upsert_cart_line(&self, line: &CartLine) -> Result<()>;

    /// Retrieves a user's live cart lines, ordered by product id.
    async fn cart_lines(&self, user_id: UserId) -> Result<Vec<CartLine>>;

    /// Deletes the cart line for (user, product), if any.
    async fn delete_cart_line(&self, user_id: UserId, product_id: ProductId) -> Result<()>;

    /// Provisionally earmarks `quantity` units of a product.
    ///
    /// Atomic with respect to concurrent reservations on the same product:
    /// succeeds iff unreserved stock covers the request, otherwise fails
    /// with `InsufficientStock` and earmarks nothing. The handle expires at
    /// `expires_at` and is then eligible for reclaim.
    async fn reserve_stock(
        &self,
        product_id: ProductId,
        quantity: u32,
        expires_at: DateTime<Utc>,
    ) -> Result<StockReservation>;

    /// Permanently decrements stored quantity by the reserved amount and
    /// discards the handle.
    ///
    /// Fails with `ReservationNotFound` if the handle was already committed,
    /// released, or reclaimed; a commit can never apply twice.
    async fn commit_reservation(&self, reservation_id: ReservationId) -> Result<()>;

    /// Discards the handle without changing stored quantity.
    ///
    /// Idempotent: releasing an unknown handle is a no-op.
    async fn release_reservation(&self, reservation_id: ReservationId) -> Result<()>;

    /// Releases every reservation whose expiry is at or before `now`.
    ///
    /// Returns the number of handles reclaimed.
    async fn reclaim_expired_reservations(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Persists a freshly opened payment session.
    async fn insert_session(&self, session: &PaymentSession) -> Result<()>;

    /// Retrieves a session by id. Returns None if it doesn't exist.
    async fn session(&self, id: SessionId) -> Result<Option<PaymentSession>>;

    /// Retrieves the session holding the given external provider reference.
    async fn session_for_payment(&self, provider_ref: &str) -> Result<Option<PaymentSession>>;

    /// Transition Initiated -> StockValidated.
    ///
    /// Guarded: fails with `SessionStateConflict` from any other state.
    async fn mark_session_validated(&self, id: SessionId) -> Result<()>;

    /// Transition StockValidated -> AwaitingPayment, storing the provider
    /// reference issued by the external authority.
    async fn mark_session_awaiting(&self, id: SessionId, provider_ref: &str) -> Result<()>;

    /// Transition any non-terminal state -> Failed, recording the reason.
    async fn mark_session_failed(&self, id: SessionId, reason: &str) -> Result<()>;

    /// Moves every non-terminal session created at or before `cutoff` to
    /// Abandoned. Returns the number of sessions abandoned.
    async fn abandon_stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Retrieves the orders materialized under an external payment
    /// reference.
    async fn orders_for_payment(&self, payment_ref: &str) -> Result<Vec<Order>>;

    /// Retrieves a user's orders, oldest first.
    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Finalizes a confirmed checkout as one atomic unit.
    ///
    /// Claims the session (AwaitingPayment -> Executed, guarded so exactly
    /// one caller wins), conditionally decrements stock for every order
    /// line, inserts the order rows, and deletes purchased cart lines when
    /// `clear_cart` is set. Any failure rolls the whole unit back:
    /// - `SessionStateConflict` if the session is not awaiting payment
    ///   (the idempotent-replay and duplicate-callback signal)
    /// - `InsufficientStock` if any line exceeds current availability
    async fn commit_checkout(&self, commit: CheckoutCommit) -> Result<()>;
}

/// Extension trait providing convenience methods for commerce stores.
#[async_trait]
pub trait CommerceStoreExt: CommerceStore {
    /// Fetches a product, failing with `ProductNotFound` if missing.
    async fn fetch_product(&self, id: ProductId) -> Result<Product> {
        self.product(id)
            .await?
            .ok_or(StoreError::ProductNotFound(id))
    }

    /// Fetches a session, failing with `SessionNotFound` if missing.
    async fn fetch_session(&self, id: SessionId) -> Result<PaymentSession> {
        self.session(id)
            .await?
            .ok_or(StoreError::SessionNotFound(id))
    }
}

// Blanket implementation for all CommerceStore implementations
impl<T: CommerceStore + ?Sized> CommerceStoreExt for T {}
