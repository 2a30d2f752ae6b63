use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use common::{ProductId, ReservationId, SessionId, UserId};

use crate::{
    CartLine, Order, PaymentSession, Product, Result, SessionState, StockReservation, StoreError,
    store::{CheckoutCommit, CommerceStore},
};

#[derive(Default)]
struct MemoryState {
    products: HashMap<ProductId, Product>,
    cart: HashMap<(UserId, ProductId), u32>,
    sessions: HashMap<SessionId, PaymentSession>,
    reservations: HashMap<ReservationId, StockReservation>,
    orders: Vec<Order>,
    fail_on_commit: bool,
}

/// In-memory store implementation for tests and dependency-free runs.
///
/// All state lives behind a single RwLock; every mutating operation takes
/// the write guard for its whole duration, which is what serializes
/// concurrent stock operations and makes `commit_checkout` atomic.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the store to fail checkout commits.
    pub async fn set_fail_on_commit(&self, fail: bool) {
        self.state.write().await.fail_on_commit = fail;
    }

    /// Returns the total number of order rows.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns the number of open reservation handles.
    pub async fn reservation_count(&self) -> usize {
        self.state.read().await.reservations.len()
    }

    /// Returns all stored sessions, in no particular order.
    pub async fn sessions(&self) -> Vec<PaymentSession> {
        self.state.read().await.sessions.values().cloned().collect()
    }

    /// Clears all stored state.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.products.clear();
        state.cart.clear();
        state.sessions.clear();
        state.reservations.clear();
        state.orders.clear();
    }
}

#[async_trait]
impl CommerceStore for InMemoryStore {
    async fn insert_product(&self, product: &Product) -> Result<()> {
        let mut state = self.state.write().await;
        state.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn product(&self, id: ProductId) -> Result<Option<Product>> {
        let state = self.state.read().await;
        Ok(state.products.get(&id).cloned())
    }

    async fn upsert_cart_line(&self, line: &CartLine) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .cart
            .insert((line.user_id, line.product_id), line.quantity);
        Ok(())
    }

    async fn cart_lines(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        let state = self.state.read().await;
        let mut lines: Vec<CartLine> = state
            .cart
            .iter()
            .filter(|((user, _), _)| *user == user_id)
            .map(|((_, product), quantity)| CartLine::new(user_id, *product, *quantity))
            .collect();
        lines.sort_by_key(|line| line.product_id);
        Ok(lines)
    }

    async fn delete_cart_line(&self, user_id: UserId, product_id: ProductId) -> Result<()> {
        let mut state = self.state.write().await;
        state.cart.remove(&(user_id, product_id));
        Ok(())
    }

    async fn reserve_stock(
        &self,
        product_id: ProductId,
        quantity: u32,
        expires_at: DateTime<Utc>,
    ) -> Result<StockReservation> {
        let mut state = self.state.write().await;
        let product = state
            .products
            .get_mut(&product_id)
            .ok_or(StoreError::ProductNotFound(product_id))?;

        let available = product.available();
        if available < quantity {
            return Err(StoreError::InsufficientStock {
                product_id,
                available,
            });
        }

        product.reserved += quantity;
        let reservation = StockReservation::new(product_id, quantity, expires_at);
        state.reservations.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn commit_reservation(&self, reservation_id: ReservationId) -> Result<()> {
        let mut state = self.state.write().await;
        let reservation = state
            .reservations
            .remove(&reservation_id)
            .ok_or(StoreError::ReservationNotFound(reservation_id))?;

        let product = state
            .products
            .get_mut(&reservation.product_id)
            .ok_or(StoreError::ProductNotFound(reservation.product_id))?;
        product.quantity = product.quantity.saturating_sub(reservation.quantity);
        product.reserved = product.reserved.saturating_sub(reservation.quantity);
        Ok(())
    }

    async fn release_reservation(&self, reservation_id: ReservationId) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(reservation) = state.reservations.remove(&reservation_id)
            && let Some(product) = state.products.get_mut(&reservation.product_id)
        {
            product.reserved = product.reserved.saturating_sub(reservation.quantity);
        }
        Ok(())
    }

    async fn reclaim_expired_reservations(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let expired: Vec<ReservationId> = state
            .reservations
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.id)
            .collect();

        for id in &expired {
            if let Some(reservation) = state.reservations.remove(id)
                && let Some(product) = state.products.get_mut(&reservation.product_id)
            {
                product.reserved = product.reserved.saturating_sub(reservation.quantity);
            }
        }
        Ok(expired.len() as u64)
    }

    async fn insert_session(&self, session: &PaymentSession) -> Result<()> {
        let mut state = self.state.write().await;
        state.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn session(&self, id: SessionId) -> Result<Option<PaymentSession>> {
        let state = self.state.read().await;
        Ok(state.sessions.get(&id).cloned())
    }

    async fn session_for_payment(&self, provider_ref: &str) -> Result<Option<PaymentSession>> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .values()
            .find(|s| s.provider_ref.as_deref() == Some(provider_ref))
            .cloned())
    }

    async fn mark_session_validated(&self, id: SessionId) -> Result<()> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or(StoreError::SessionNotFound(id))?;
        if !session.state.can_validate() {
            return Err(StoreError::SessionStateConflict {
                session_id: id,
                attempted: SessionState::StockValidated,
                actual: session.state,
            });
        }
        session.state = SessionState::StockValidated;
        Ok(())
    }

    async fn mark_session_awaiting(&self, id: SessionId, provider_ref: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or(StoreError::SessionNotFound(id))?;
        if !session.state.can_await_payment() {
            return Err(StoreError::SessionStateConflict {
                session_id: id,
                attempted: SessionState::AwaitingPayment,
                actual: session.state,
            });
        }
        session.state = SessionState::AwaitingPayment;
        session.provider_ref = Some(provider_ref.to_string());
        Ok(())
    }

    async fn mark_session_failed(&self, id: SessionId, reason: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or(StoreError::SessionNotFound(id))?;
        if !session.state.can_fail() {
            return Err(StoreError::SessionStateConflict {
                session_id: id,
                attempted: SessionState::Failed,
                actual: session.state,
            });
        }
        session.state = SessionState::Failed;
        session.failure_reason = Some(reason.to_string());
        Ok(())
    }

    async fn abandon_stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut abandoned = 0;
        for session in state.sessions.values_mut() {
            if session.state.can_abandon() && session.created_at <= cutoff {
                session.state = SessionState::Abandoned;
                abandoned += 1;
            }
        }
        Ok(abandoned)
    }

    async fn orders_for_payment(&self, payment_ref: &str) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .iter()
            .filter(|o| o.payment_ref == payment_ref)
            .cloned()
            .collect())
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn commit_checkout(&self, commit: CheckoutCommit) -> Result<()> {
        let mut state = self.state.write().await;

        if state.fail_on_commit {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }

        let session = state
            .sessions
            .get(&commit.session_id)
            .ok_or(StoreError::SessionNotFound(commit.session_id))?;
        if !session.state.can_execute() {
            return Err(StoreError::SessionStateConflict {
                session_id: commit.session_id,
                attempted: SessionState::Executed,
                actual: session.state,
            });
        }

        // Validate every line before mutating anything so a shortfall
        // leaves no partial state. Quantities accumulate per product so
        // repeated lines are checked against their sum.
        let mut requested: HashMap<ProductId, u32> = HashMap::new();
        for order in &commit.orders {
            let product = state
                .products
                .get(&order.product_id)
                .ok_or(StoreError::ProductNotFound(order.product_id))?;
            let total = requested.entry(order.product_id).or_insert(0);
            *total += order.quantity;
            let available = product.available();
            if available < *total {
                return Err(StoreError::InsufficientStock {
                    product_id: order.product_id,
                    available,
                });
            }
        }

        for order in &commit.orders {
            if let Some(product) = state.products.get_mut(&order.product_id) {
                product.quantity -= order.quantity;
            }
            if commit.clear_cart {
                state.cart.remove(&(commit.user_id, order.product_id));
            }
        }
        if let Some(session) = state.sessions.get_mut(&commit.session_id) {
            session.state = SessionState::Executed;
        }
        state.orders.extend(commit.orders);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    use common::Money;

    use crate::{CartSnapshot, CheckoutKind, SnapshotLine};

    async fn store_with_product(quantity: u32) -> (InMemoryStore, Product) {
        let store = InMemoryStore::new();
        let product = Product::new("Widget", Money::from_cents(1000), quantity);
        store.insert_product(&product).await.unwrap();
        (store, product)
    }

    fn far_expiry() -> DateTime<Utc> {
        Utc::now() + Duration::minutes(15)
    }

    async fn awaiting_session(
        store: &InMemoryStore,
        user_id: UserId,
        product: &Product,
        quantity: u32,
        payment_ref: &str,
    ) -> PaymentSession {
        let snapshot = CartSnapshot::new(vec![SnapshotLine::new(
            product.id,
            product.name.clone(),
            product.unit_price,
            quantity,
        )]);
        let session = PaymentSession::open(user_id, CheckoutKind::Cart, snapshot);
        store.insert_session(&session).await.unwrap();
        store.mark_session_validated(session.id).await.unwrap();
        store
            .mark_session_awaiting(session.id, payment_ref)
            .await
            .unwrap();
        store.session(session.id).await.unwrap().unwrap()
    }

    fn commit_for(session: &PaymentSession, payment_ref: &str) -> CheckoutCommit {
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
                    payment_ref,
                    "PAYER-1",
                    Utc::now(),
                )
            })
            .collect();
        CheckoutCommit {
            session_id: session.id,
            user_id: session.user_id,
            clear_cart: true,
            orders,
        }
    }

    #[tokio::test]
    async fn product_roundtrip() {
        let (store, product) = store_with_product(5).await;
        let fetched = store.product(product.id).await.unwrap().unwrap();
        assert_eq!(fetched, product);

        let missing = store.product(ProductId::new()).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn cart_line_upsert_replaces_quantity() {
        let (store, product) = store_with_product(5).await;
        let user = UserId::new();

        store
            .upsert_cart_line(&CartLine::new(user, product.id, 2))
            .await
            .unwrap();
        store
            .upsert_cart_line(&CartLine::new(user, product.id, 4))
            .await
            .unwrap();

        let lines = store.cart_lines(user).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 4);
    }

    #[tokio::test]
    async fn cart_lines_only_for_requested_user() {
        let (store, product) = store_with_product(5).await;
        let alice = UserId::new();
        let bob = UserId::new();

        store
            .upsert_cart_line(&CartLine::new(alice, product.id, 1))
            .await
            .unwrap();
        store
            .upsert_cart_line(&CartLine::new(bob, product.id, 2))
            .await
            .unwrap();
        store.delete_cart_line(alice, product.id).await.unwrap();

        assert!(store.cart_lines(alice).await.unwrap().is_empty());
        assert_eq!(store.cart_lines(bob).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reserve_earmarks_without_changing_quantity() {
        let (store, product) = store_with_product(10).await;

        let reservation = store
            .reserve_stock(product.id, 4, far_expiry())
            .await
            .unwrap();
        assert_eq!(reservation.quantity, 4);
        assert_eq!(store.reservation_count().await, 1);

        let fetched = store.product(product.id).await.unwrap().unwrap();
        assert_eq!(fetched.quantity, 10);
        assert_eq!(fetched.reserved, 4);
        assert_eq!(fetched.available(), 6);
    }

    #[tokio::test]
    async fn reserve_fails_when_earmarks_exhaust_stock() {
        let (store, product) = store_with_product(5).await;

        store
            .reserve_stock(product.id, 3, far_expiry())
            .await
            .unwrap();
        let result = store.reserve_stock(product.id, 3, far_expiry()).await;

        match result {
            Err(StoreError::InsufficientStock {
                product_id,
                available,
            }) => {
                assert_eq!(product_id, product.id);
                assert_eq!(available, 2);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        // the failed attempt earmarked nothing
        assert_eq!(store.reservation_count().await, 1);
    }

    #[tokio::test]
    async fn reserve_unknown_product() {
        let store = InMemoryStore::new();
        let result = store.reserve_stock(ProductId::new(), 1, far_expiry()).await;
        assert!(matches!(result, Err(StoreError::ProductNotFound(_))));
    }

    #[tokio::test]
    async fn commit_reservation_decrements_quantity() {
        let (store, product) = store_with_product(10).await;
        let reservation = store
            .reserve_stock(product.id, 4, far_expiry())
            .await
            .unwrap();

        store.commit_reservation(reservation.id).await.unwrap();

        let fetched = store.product(product.id).await.unwrap().unwrap();
        assert_eq!(fetched.quantity, 6);
        assert_eq!(fetched.reserved, 0);
        assert_eq!(store.reservation_count().await, 0);
    }

    #[tokio::test]
    async fn commit_reservation_twice_fails() {
        let (store, product) = store_with_product(10).await;
        let reservation = store
            .reserve_stock(product.id, 4, far_expiry())
            .await
            .unwrap();

        store.commit_reservation(reservation.id).await.unwrap();
        let result = store.commit_reservation(reservation.id).await;
        assert!(matches!(result, Err(StoreError::ReservationNotFound(_))));

        // quantity was decremented exactly once
        let fetched = store.product(product.id).await.unwrap().unwrap();
        assert_eq!(fetched.quantity, 6);
    }

    #[tokio::test]
    async fn release_restores_availability() {
        let (store, product) = store_with_product(10).await;
        let reservation = store
            .reserve_stock(product.id, 4, far_expiry())
            .await
            .unwrap();

        store.release_reservation(reservation.id).await.unwrap();

        let fetched = store.product(product.id).await.unwrap().unwrap();
        assert_eq!(fetched.quantity, 10);
        assert_eq!(fetched.available(), 10);

        // releasing again is a no-op
        store.release_reservation(reservation.id).await.unwrap();
    }

    #[tokio::test]
    async fn reclaim_releases_only_expired_handles() {
        let (store, product) = store_with_product(10).await;
        let now = Utc::now();

        store
            .reserve_stock(product.id, 2, now + Duration::minutes(1))
            .await
            .unwrap();
        store
            .reserve_stock(product.id, 3, now + Duration::minutes(30))
            .await
            .unwrap();

        let reclaimed = store
            .reclaim_expired_reservations(now + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(reclaimed, 1);
        assert_eq!(store.reservation_count().await, 1);

        let fetched = store.product(product.id).await.unwrap().unwrap();
        assert_eq!(fetched.reserved, 3);
    }

    #[tokio::test]
    async fn session_lookup_by_provider_ref() {
        let (store, product) = store_with_product(5).await;
        let session = awaiting_session(&store, UserId::new(), &product, 1, "PAY-42").await;

        let found = store.session_for_payment("PAY-42").await.unwrap().unwrap();
        assert_eq!(found.id, session.id);
        assert_eq!(found.state, SessionState::AwaitingPayment);

        assert!(store.session_for_payment("PAY-999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn session_transitions_are_guarded() {
        let (store, product) = store_with_product(5).await;
        let snapshot = CartSnapshot::new(vec![SnapshotLine::new(
            product.id,
            product.name.clone(),
            product.unit_price,
            1,
        )]);
        let session = PaymentSession::open(UserId::new(), CheckoutKind::Cart, snapshot);
        store.insert_session(&session).await.unwrap();

        // cannot skip straight to awaiting payment
        let result = store.mark_session_awaiting(session.id, "PAY-1").await;
        assert!(matches!(
            result,
            Err(StoreError::SessionStateConflict {
                attempted: SessionState::AwaitingPayment,
                actual: SessionState::Initiated,
                ..
            })
        ));

        store.mark_session_validated(session.id).await.unwrap();
        let result = store.mark_session_validated(session.id).await;
        assert!(matches!(
            result,
            Err(StoreError::SessionStateConflict { .. })
        ));
    }

    #[tokio::test]
    async fn mark_failed_refused_once_terminal() {
        let (store, product) = store_with_product(5).await;
        let session = awaiting_session(&store, UserId::new(), &product, 1, "PAY-1").await;

        store
            .mark_session_failed(session.id, "payer cancelled")
            .await
            .unwrap();
        let stored = store.session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some("payer cancelled"));

        let result = store.mark_session_failed(session.id, "again").await;
        assert!(matches!(
            result,
            Err(StoreError::SessionStateConflict { .. })
        ));
    }

    #[tokio::test]
    async fn abandon_only_stale_non_terminal_sessions() {
        let (store, product) = store_with_product(5).await;
        let user = UserId::new();

        let mut stale = awaiting_session(&store, user, &product, 1, "PAY-1").await;
        stale.created_at = Utc::now() - Duration::minutes(30);
        store.insert_session(&stale).await.unwrap();

        let fresh = awaiting_session(&store, user, &product, 1, "PAY-2").await;

        let cutoff = Utc::now() - Duration::minutes(15);
        let abandoned = store.abandon_stale_sessions(cutoff).await.unwrap();
        assert_eq!(abandoned, 1);

        let stale = store.session(stale.id).await.unwrap().unwrap();
        assert_eq!(stale.state, SessionState::Abandoned);
        let fresh = store.session(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.state, SessionState::AwaitingPayment);
    }

    #[tokio::test]
    async fn commit_checkout_executes_session_and_clears_cart() {
        let (store, product) = store_with_product(10).await;
        let user = UserId::new();
        store
            .upsert_cart_line(&CartLine::new(user, product.id, 2))
            .await
            .unwrap();

        let session = awaiting_session(&store, user, &product, 2, "PAY-7").await;
        store
            .commit_checkout(commit_for(&session, "PAY-7"))
            .await
            .unwrap();

        let fetched = store.product(product.id).await.unwrap().unwrap();
        assert_eq!(fetched.quantity, 8);
        assert!(store.cart_lines(user).await.unwrap().is_empty());

        let stored = store.session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Executed);

        let orders = store.orders_for_payment("PAY-7").await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].total, Money::from_cents(2000));
    }

    #[tokio::test]
    async fn commit_checkout_is_all_or_nothing() {
        let (store, product) = store_with_product(1).await;
        let user = UserId::new();
        store
            .upsert_cart_line(&CartLine::new(user, product.id, 2))
            .await
            .unwrap();

        let session = awaiting_session(&store, user, &product, 2, "PAY-9").await;
        let result = store.commit_checkout(commit_for(&session, "PAY-9")).await;

        assert!(matches!(
            result,
            Err(StoreError::InsufficientStock { available: 1, .. })
        ));

        // nothing changed: stock, cart, session, orders
        let fetched = store.product(product.id).await.unwrap().unwrap();
        assert_eq!(fetched.quantity, 1);
        assert_eq!(store.cart_lines(user).await.unwrap().len(), 1);
        let stored = store.session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::AwaitingPayment);
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn commit_checkout_refuses_executed_session() {
        let (store, product) = store_with_product(10).await;
        let user = UserId::new();
        let session = awaiting_session(&store, user, &product, 1, "PAY-3").await;

        store
            .commit_checkout(commit_for(&session, "PAY-3"))
            .await
            .unwrap();
        let result = store.commit_checkout(commit_for(&session, "PAY-3")).await;

        assert!(matches!(
            result,
            Err(StoreError::SessionStateConflict {
                attempted: SessionState::Executed,
                actual: SessionState::Executed,
                ..
            })
        ));
        assert_eq!(store.order_count().await, 1);
    }

    #[tokio::test]
    async fn commit_checkout_checks_lines_cumulatively() {
        let (store, product) = store_with_product(5).await;
        let user = UserId::new();
        let session = awaiting_session(&store, user, &product, 3, "PAY-11").await;

        // two lines for the same product that only fit individually
        let commit = CheckoutCommit {
            session_id: session.id,
            user_id: user,
            clear_cart: false,
            orders: vec![
                Order::new(
                    user,
                    product.id,
                    3,
                    Money::from_cents(3000),
                    "PAY-11",
                    "PAYER-1",
                    Utc::now(),
                ),
                Order::new(
                    user,
                    product.id,
                    3,
                    Money::from_cents(3000),
                    "PAY-11",
                    "PAYER-1",
                    Utc::now(),
                ),
            ],
        };
        let result = store.commit_checkout(commit).await;

        assert!(matches!(
            result,
            Err(StoreError::InsufficientStock { available: 5, .. })
        ));

        let fetched = store.product(product.id).await.unwrap().unwrap();
        assert_eq!(fetched.quantity, 5);
        assert_eq!(store.order_count().await, 0);
        let stored = store.session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::AwaitingPayment);
    }

    #[tokio::test]
    async fn fail_on_commit_leaves_state_untouched() {
        let (store, product) = store_with_product(5).await;
        let user = UserId::new();
        let session = awaiting_session(&store, user, &product, 2, "PAY-12").await;

        store.set_fail_on_commit(true).await;
        let result = store.commit_checkout(commit_for(&session, "PAY-12")).await;
        assert!(matches!(result, Err(StoreError::Database(_))));

        let fetched = store.product(product.id).await.unwrap().unwrap();
        assert_eq!(fetched.quantity, 5);
        assert_eq!(store.order_count().await, 0);
        let stored = store.session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::AwaitingPayment);

        // cleared, the same commit goes through
        store.set_fail_on_commit(false).await;
        store
            .commit_checkout(commit_for(&session, "PAY-12"))
            .await
            .unwrap();
        assert_eq!(store.order_count().await, 1);
    }

    #[tokio::test]
    async fn commit_checkout_keeps_cart_for_direct_purchase() {
        let (store, product) = store_with_product(10).await;
        let user = UserId::new();
        store
            .upsert_cart_line(&CartLine::new(user, product.id, 5))
            .await
            .unwrap();

        let session = awaiting_session(&store, user, &product, 1, "PAY-4").await;
        let mut commit = commit_for(&session, "PAY-4");
        commit.clear_cart = false;
        store.commit_checkout(commit).await.unwrap();

        assert_eq!(store.cart_lines(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_reserves_never_oversell() {
        let (store, product) = store_with_product(5).await;

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..10 {
            let store = store.clone();
            let product_id = product.id;
            tasks.spawn(async move { store.reserve_stock(product_id, 1, far_expiry()).await });
        }

        let mut granted = Vec::new();
        while let Some(result) = tasks.join_next().await {
            if let Ok(reservation) = result.unwrap() {
                granted.push(reservation);
            }
        }
        assert_eq!(granted.len(), 5);

        for reservation in granted {
            store.commit_reservation(reservation.id).await.unwrap();
        }
        let fetched = store.product(product.id).await.unwrap().unwrap();
        assert_eq!(fetched.quantity, 0);
        assert_eq!(fetched.reserved, 0);
    }
}
