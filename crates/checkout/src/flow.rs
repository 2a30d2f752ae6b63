//! Checkout flow orchestration.

use chrono::{Duration, Utc};
use commerce_store::{
    CartSnapshot, CheckoutKind, CommerceStore, CommerceStoreExt, Order, PaymentSession,
    SessionState, StockReservation, StoreError,
};
use common::{ProductId, ReservationId, SessionId, UserId};

use crate::error::{CheckoutError, Result};
use crate::gateway::{PaymentGateway, PaymentItem, PaymentRequest};
use crate::materializer;
use crate::snapshot;

/// Configuration for checkout orchestration.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// How long a session may stay open before the sweeper abandons it.
    pub session_ttl: Duration,
    /// How long a standalone stock reservation holds its earmark.
    pub reservation_ttl: Duration,
    /// Where the payment provider redirects the payer after approval.
    pub return_url: String,
    /// Where the payment provider redirects the payer on cancellation.
    pub cancel_url: String,
    /// ISO 4217 currency code sent to the payment provider.
    pub currency: String,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::minutes(15),
            reservation_ttl: Duration::minutes(10),
            return_url: "http://localhost:8080/checkout/confirm".to_string(),
            cancel_url: "http://localhost:8080/checkout/cancel".to_string(),
            currency: "USD".to_string(),
        }
    }
}

/// Redirect handed back to the storefront after a checkout begins.
#[derive(Debug, Clone)]
pub struct CheckoutRedirect {
    pub session_id: SessionId,
    /// The provider page where the payer approves the payment.
    pub redirect_url: String,
}

/// Receipt for an executed checkout.
#[derive(Debug, Clone)]
pub struct CheckoutReceipt {
    pub session_id: SessionId,
    pub orders: Vec<Order>,
}

/// Counts from one sweeper pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    pub sessions_abandoned: u64,
    pub reservations_reclaimed: u64,
}

/// Orchestrates the checkout lifecycle against a store and a payment
/// gateway.
///
/// A checkout runs in two halves. The begin half freezes a snapshot,
/// persists the session, validates stock, and obtains a provider
/// redirect. The confirm half runs when the provider calls back:
/// execute the payment, then claim the session and materialize orders
/// in a single store transaction. Everything the confirm half needs is
/// read from the stored session; the callback contributes only the
/// provider's two references.
pub struct CheckoutFlow<S, G>
where
    S: CommerceStore,
    G: PaymentGateway,
{
    store: S,
    gateway: G,
    config: CheckoutConfig,
}

impl<S, G> CheckoutFlow<S, G>
where
    S: CommerceStore,
    G: PaymentGateway,
{
    /// Creates a new checkout flow.
    pub fn new(store: S, gateway: G, config: CheckoutConfig) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    /// Gets a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Gets the active configuration.
    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// Starts a checkout over the user's whole cart.
    #[tracing::instrument(skip(self), fields(kind = "cart"))]
    pub async fn begin_cart_checkout(&self, user_id: UserId) -> Result<CheckoutRedirect> {
        metrics::counter!("checkouts_started_total").increment(1);

        let snapshot = snapshot::snapshot_cart(&self.store, user_id).await?;
        self.begin(user_id, CheckoutKind::Cart, snapshot).await
    }

    /// Starts a checkout for a single product, bypassing the cart.
    #[tracing::instrument(skip(self), fields(kind = "product"))]
    pub async fn begin_product_checkout(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CheckoutRedirect> {
        metrics::counter!("checkouts_started_total").increment(1);

        let snapshot = snapshot::snapshot_product(&self.store, product_id, quantity).await?;
        self.begin(user_id, CheckoutKind::Product, snapshot).await
    }

    async fn begin(
        &self,
        user_id: UserId,
        kind: CheckoutKind,
        snapshot: CartSnapshot,
    ) -> Result<CheckoutRedirect> {
        // 1. Persist the session first so every later outcome lands on a
        //    stored record
        let session = PaymentSession::open(user_id, kind, snapshot);
        self.store.insert_session(&session).await?;

        // 2. Validate stock against what is currently unreserved
        if let Err(e) = self.check_stock(&session).await {
            self.fail_session(session.id, &e.to_string()).await;
            metrics::counter!("checkouts_failed_total").increment(1);
            return Err(e);
        }
        self.store.mark_session_validated(session.id).await?;

        // 3. Ask the provider to authorize the payment
        let authorization = match self.gateway.authorize(self.payment_request(&session)).await {
            Ok(authorization) => authorization,
            Err(e) => {
                self.fail_session(session.id, &e.to_string()).await;
                metrics::counter!("checkouts_failed_total").increment(1);
                return Err(e);
            }
        };

        // 4. Bind the provider reference and hand back the approval page
        self.store
            .mark_session_awaiting(session.id, &authorization.provider_ref)
            .await?;

        tracing::info!(
            session_id = %session.id,
            provider_ref = %authorization.provider_ref,
            total = %session.total,
            "checkout awaiting payment approval"
        );

        Ok(CheckoutRedirect {
            session_id: session.id,
            redirect_url: authorization.redirect_url,
        })
    }

    /// Handles the provider's approval callback.
    ///
    /// Replayed callbacks for an executed session return the original
    /// receipt without touching the gateway or stock.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_payment(
        &self,
        payment_ref: &str,
        payer_ref: &str,
    ) -> Result<CheckoutReceipt> {
        let confirm_start = std::time::Instant::now();

        let session = self
            .store
            .session_for_payment(payment_ref)
            .await?
            .ok_or_else(|| CheckoutError::SessionNotFound(payment_ref.to_string()))?;

        if session.state == SessionState::Executed {
            return self.receipt(session.id, payment_ref).await;
        }
        if session.state.is_terminal() {
            return Err(CheckoutError::SessionClosed {
                session_id: session.id,
                state: session.state,
            });
        }

        // 1. Execute the approved payment with the provider
        if let Err(e) = self.gateway.execute(payment_ref, payer_ref).await {
            self.fail_session(session.id, &e.to_string()).await;
            metrics::counter!("checkouts_failed_total").increment(1);
            metrics::histogram!("checkout_execution_seconds")
                .record(confirm_start.elapsed().as_secs_f64());
            return Err(e);
        }

        // 2. Materialize in one transaction: claim the session, decrement
        //    stock, write orders, clear purchased cart lines
        let commit = materializer::plan_checkout(&session, payment_ref, payer_ref, Utc::now());
        match self.store.commit_checkout(commit).await {
            Ok(()) => {}
            Err(StoreError::SessionStateConflict {
                actual: SessionState::Executed,
                ..
            }) => {
                // A concurrent callback won the claim; replay its receipt
                return self.receipt(session.id, payment_ref).await;
            }
            Err(StoreError::SessionStateConflict { actual, .. }) => {
                return Err(CheckoutError::SessionClosed {
                    session_id: session.id,
                    state: actual,
                });
            }
            Err(StoreError::InsufficientStock {
                product_id,
                available,
            }) => {
                let e = CheckoutError::InsufficientStock {
                    product_id,
                    available,
                };
                self.fail_session(session.id, &e.to_string()).await;
                metrics::counter!("checkouts_failed_total").increment(1);
                metrics::histogram!("checkout_execution_seconds")
                    .record(confirm_start.elapsed().as_secs_f64());
                return Err(e);
            }
            Err(e) => {
                // The payment has executed but the orders did not land.
                // The session stays awaiting so a retried callback can
                // materialize again; surface loudly for reconciliation.
                let e = CheckoutError::MaterializationFailed {
                    session_id: session.id,
                    reason: e.to_string(),
                };
                tracing::error!(
                    session_id = %session.id,
                    user_id = %session.user_id,
                    payment_ref,
                    total = %session.total,
                    error = %e,
                    "order materialization failed after payment execution"
                );
                metrics::counter!("checkouts_failed_total").increment(1);
                metrics::histogram!("checkout_execution_seconds")
                    .record(confirm_start.elapsed().as_secs_f64());
                return Err(e);
            }
        }

        metrics::counter!("checkouts_executed_total").increment(1);
        metrics::histogram!("checkout_execution_seconds")
            .record(confirm_start.elapsed().as_secs_f64());
        tracing::info!(session_id = %session.id, payment_ref, "checkout executed");

        self.receipt(session.id, payment_ref).await
    }

    /// Handles the provider's cancellation callback.
    ///
    /// Cancelling is idempotent: a session that already failed or was
    /// abandoned is left as it is.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_payment(&self, payment_ref: &str) -> Result<SessionId> {
        let session = self
            .store
            .session_for_payment(payment_ref)
            .await?
            .ok_or_else(|| CheckoutError::SessionNotFound(payment_ref.to_string()))?;

        match session.state {
            SessionState::Executed => Err(CheckoutError::SessionClosed {
                session_id: session.id,
                state: session.state,
            }),
            SessionState::Failed | SessionState::Abandoned => Ok(session.id),
            _ => match self
                .store
                .mark_session_failed(session.id, "cancelled by payer")
                .await
            {
                Ok(()) => {
                    metrics::counter!("checkouts_cancelled_total").increment(1);
                    tracing::info!(session_id = %session.id, payment_ref, "checkout cancelled by payer");
                    Ok(session.id)
                }
                Err(StoreError::SessionStateConflict { actual, .. }) => {
                    Err(CheckoutError::SessionClosed {
                        session_id: session.id,
                        state: actual,
                    })
                }
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Loads a session by ID.
    pub async fn session(&self, session_id: SessionId) -> Result<PaymentSession> {
        Ok(self.store.fetch_session(session_id).await?)
    }

    /// Lists a user's orders, oldest first.
    pub async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self.store.orders_for_user(user_id).await?)
    }

    /// Places a standalone stock reservation with the configured TTL.
    pub async fn reserve_stock(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<StockReservation> {
        if quantity == 0 {
            return Err(CheckoutError::InvalidQuantity { quantity });
        }
        let expires_at = Utc::now() + self.config.reservation_ttl;
        Ok(self
            .store
            .reserve_stock(product_id, quantity, expires_at)
            .await?)
    }

    /// Converts a reservation into a permanent stock decrement.
    pub async fn commit_reservation(&self, reservation_id: ReservationId) -> Result<()> {
        Ok(self.store.commit_reservation(reservation_id).await?)
    }

    /// Releases a reservation's earmark back to availability.
    pub async fn release_reservation(&self, reservation_id: ReservationId) -> Result<()> {
        Ok(self.store.release_reservation(reservation_id).await?)
    }

    /// Abandons stale sessions and reclaims expired reservation earmarks.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        let now = Utc::now();
        let sessions_abandoned = self
            .store
            .abandon_stale_sessions(now - self.config.session_ttl)
            .await?;
        let reservations_reclaimed = self.store.reclaim_expired_reservations(now).await?;

        if sessions_abandoned > 0 || reservations_reclaimed > 0 {
            metrics::counter!("sessions_abandoned_total").increment(sessions_abandoned);
            metrics::counter!("reservations_reclaimed_total").increment(reservations_reclaimed);
            tracing::info!(
                sessions_abandoned,
                reservations_reclaimed,
                "sweeper reclaimed expired checkout work"
            );
        }

        Ok(SweepReport {
            sessions_abandoned,
            reservations_reclaimed,
        })
    }

    async fn check_stock(&self, session: &PaymentSession) -> Result<()> {
        for line in session.snapshot.lines() {
            let product = self.store.fetch_product(line.product_id).await?;
            if product.available() < line.quantity {
                return Err(CheckoutError::InsufficientStock {
                    product_id: line.product_id,
                    available: product.available(),
                });
            }
        }
        Ok(())
    }

    fn payment_request(&self, session: &PaymentSession) -> PaymentRequest {
        let items = session
            .snapshot
            .lines()
            .iter()
            .map(|line| PaymentItem {
                product_id: line.product_id,
                name: line.name.clone(),
                unit_price: line.unit_price,
                quantity: line.quantity,
            })
            .collect();

        PaymentRequest {
            user_id: session.user_id,
            items,
            total: session.total,
            currency: self.config.currency.clone(),
            return_url: self.config.return_url.clone(),
            cancel_url: self.config.cancel_url.clone(),
        }
    }

    /// Marks the session failed, tolerating one that already closed.
    async fn fail_session(&self, session_id: SessionId, reason: &str) {
        if let Err(e) = self.store.mark_session_failed(session_id, reason).await {
            tracing::warn!(%session_id, error = %e, "could not record session failure");
        }
    }

    async fn receipt(&self, session_id: SessionId, payment_ref: &str) -> Result<CheckoutReceipt> {
        let orders = self.store.orders_for_payment(payment_ref).await?;
        Ok(CheckoutReceipt { session_id, orders })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InMemoryGateway;
    use commerce_store::{CartLine, InMemoryStore, Product};
    use common::Money;

    fn setup() -> (
        CheckoutFlow<InMemoryStore, InMemoryGateway>,
        InMemoryStore,
        InMemoryGateway,
    ) {
        let store = InMemoryStore::new();
        let gateway = InMemoryGateway::new();
        let flow = CheckoutFlow::new(store.clone(), gateway.clone(), CheckoutConfig::default());
        (flow, store, gateway)
    }

    async fn seed_product(store: &InMemoryStore, price_cents: i64, quantity: u32) -> Product {
        let product = Product::new("Widget", Money::from_cents(price_cents), quantity);
        store.insert_product(&product).await.unwrap();
        product
    }

    async fn fill_cart(store: &InMemoryStore, user: UserId, product: &Product, quantity: u32) {
        store
            .upsert_cart_line(&CartLine::new(user, product.id, quantity))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cart_checkout_happy_path() {
        let (flow, store, gateway) = setup();
        let product = seed_product(&store, 1000, 10).await;
        let user = UserId::new();
        fill_cart(&store, user, &product, 2).await;

        let redirect = flow.begin_cart_checkout(user).await.unwrap();
        assert!(redirect.redirect_url.contains("PAY-0001"));

        let session = store.session(redirect.session_id).await.unwrap().unwrap();
        assert_eq!(session.state, SessionState::AwaitingPayment);
        assert_eq!(session.provider_ref.as_deref(), Some("PAY-0001"));
        assert_eq!(session.total, Money::from_cents(2000));

        let receipt = flow.confirm_payment("PAY-0001", "PAYER-1").await.unwrap();
        assert_eq!(receipt.session_id, redirect.session_id);
        assert_eq!(receipt.orders.len(), 1);
        assert_eq!(receipt.orders[0].total, Money::from_cents(2000));

        let stored = store.product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.quantity, 8);
        assert!(store.cart_lines(user).await.unwrap().is_empty());
        assert_eq!(gateway.executed_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_cart_creates_no_session() {
        let (flow, store, _) = setup();

        let result = flow.begin_cart_checkout(UserId::new()).await;
        assert!(matches!(result, Err(CheckoutError::EmptyCart)));
        assert!(store.sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_stock_fails_session_before_gateway() {
        let (flow, store, gateway) = setup();
        let product = seed_product(&store, 1000, 1).await;
        let user = UserId::new();
        fill_cart(&store, user, &product, 2).await;

        let result = flow.begin_cart_checkout(user).await;
        assert!(matches!(
            result,
            Err(CheckoutError::InsufficientStock { available: 1, .. })
        ));

        let sessions = store.sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].state, SessionState::Failed);
        assert!(sessions[0].failure_reason.is_some());
        assert_eq!(gateway.payment_count(), 0);
    }

    #[tokio::test]
    async fn test_authorization_failure_fails_session() {
        let (flow, store, gateway) = setup();
        let product = seed_product(&store, 1000, 10).await;
        let user = UserId::new();
        fill_cart(&store, user, &product, 1).await;
        gateway.set_fail_on_authorize(true);

        let result = flow.begin_cart_checkout(user).await;
        assert!(matches!(
            result,
            Err(CheckoutError::PaymentAuthorizationFailed(_))
        ));

        let sessions = store.sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].state, SessionState::Failed);
    }

    #[tokio::test]
    async fn test_execution_failure_fails_session_and_keeps_stock() {
        let (flow, store, gateway) = setup();
        let product = seed_product(&store, 1000, 10).await;
        let user = UserId::new();
        fill_cart(&store, user, &product, 2).await;

        flow.begin_cart_checkout(user).await.unwrap();
        gateway.set_fail_on_execute(true);

        let result = flow.confirm_payment("PAY-0001", "PAYER-1").await;
        assert!(matches!(
            result,
            Err(CheckoutError::PaymentExecutionFailed(_))
        ));

        let sessions = store.sessions().await;
        assert_eq!(sessions[0].state, SessionState::Failed);
        let stored = store.product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.quantity, 10);
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_direct_product_checkout_keeps_cart() {
        let (flow, store, _) = setup();
        let in_cart = seed_product(&store, 1000, 10).await;
        let direct = seed_product(&store, 500, 10).await;
        let user = UserId::new();
        fill_cart(&store, user, &in_cart, 1).await;

        flow.begin_product_checkout(user, direct.id, 3).await.unwrap();
        let receipt = flow.confirm_payment("PAY-0001", "PAYER-1").await.unwrap();

        assert_eq!(receipt.orders.len(), 1);
        assert_eq!(receipt.orders[0].total, Money::from_cents(1500));
        assert_eq!(store.cart_lines(user).await.unwrap().len(), 1);

        let stored = store.product(direct.id).await.unwrap().unwrap();
        assert_eq!(stored.quantity, 7);
    }

    #[tokio::test]
    async fn test_zero_quantity_direct_checkout() {
        let (flow, store, _) = setup();
        let product = seed_product(&store, 1000, 10).await;

        let result = flow.begin_product_checkout(UserId::new(), product.id, 0).await;
        assert!(matches!(
            result,
            Err(CheckoutError::InvalidQuantity { quantity: 0 })
        ));
        assert!(store.sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_callback_for_unknown_payment() {
        let (flow, _, _) = setup();

        let result = flow.confirm_payment("PAY-404", "PAYER-1").await;
        assert!(matches!(result, Err(CheckoutError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_replayed_callback_returns_original_receipt() {
        let (flow, store, gateway) = setup();
        let product = seed_product(&store, 1000, 10).await;
        let user = UserId::new();
        fill_cart(&store, user, &product, 2).await;

        flow.begin_cart_checkout(user).await.unwrap();
        let first = flow.confirm_payment("PAY-0001", "PAYER-1").await.unwrap();
        let second = flow.confirm_payment("PAY-0001", "PAYER-1").await.unwrap();

        assert_eq!(first.orders.len(), 1);
        assert_eq!(second.orders.len(), 1);
        assert_eq!(first.orders[0].id, second.orders[0].id);

        // stock moved once and the payment executed once
        let stored = store.product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.quantity, 8);
        assert_eq!(gateway.executed_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_fails_open_session_idempotently() {
        let (flow, store, _) = setup();
        let product = seed_product(&store, 1000, 10).await;
        let user = UserId::new();
        fill_cart(&store, user, &product, 1).await;

        let redirect = flow.begin_cart_checkout(user).await.unwrap();

        let session_id = flow.cancel_payment("PAY-0001").await.unwrap();
        assert_eq!(session_id, redirect.session_id);

        let session = store.session(session_id).await.unwrap().unwrap();
        assert_eq!(session.state, SessionState::Failed);
        assert_eq!(session.failure_reason.as_deref(), Some("cancelled by payer"));

        // cancelling again stays settled
        let again = flow.cancel_payment("PAY-0001").await.unwrap();
        assert_eq!(again, session_id);

        // stock was never touched
        let stored = store.product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.quantity, 10);
    }

    #[tokio::test]
    async fn test_cancel_refuses_executed_session() {
        let (flow, store, _) = setup();
        let product = seed_product(&store, 1000, 10).await;
        let user = UserId::new();
        fill_cart(&store, user, &product, 1).await;

        flow.begin_cart_checkout(user).await.unwrap();
        flow.confirm_payment("PAY-0001", "PAYER-1").await.unwrap();

        let result = flow.cancel_payment("PAY-0001").await;
        assert!(matches!(
            result,
            Err(CheckoutError::SessionClosed {
                state: SessionState::Executed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_sweep_abandons_stale_sessions_and_reclaims_earmarks() {
        let (flow, store, _) = setup();
        let product = seed_product(&store, 1000, 10).await;
        let user = UserId::new();
        fill_cart(&store, user, &product, 1).await;

        let redirect = flow.begin_cart_checkout(user).await.unwrap();

        // age the session past the TTL
        let mut session = store.session(redirect.session_id).await.unwrap().unwrap();
        session.created_at = Utc::now() - Duration::hours(1);
        store.insert_session(&session).await.unwrap();

        // place an already expired reservation
        store
            .reserve_stock(product.id, 2, Utc::now() - Duration::minutes(1))
            .await
            .unwrap();

        let report = flow.sweep_expired().await.unwrap();
        assert_eq!(report.sessions_abandoned, 1);
        assert_eq!(report.reservations_reclaimed, 1);

        let session = store.session(redirect.session_id).await.unwrap().unwrap();
        assert_eq!(session.state, SessionState::Abandoned);
        let stored = store.product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.reserved, 0);
        assert_eq!(stored.quantity, 10);
    }

    #[tokio::test]
    async fn test_reservation_passthrough_validates_quantity() {
        let (flow, store, _) = setup();
        let product = seed_product(&store, 1000, 10).await;

        let result = flow.reserve_stock(product.id, 0).await;
        assert!(matches!(
            result,
            Err(CheckoutError::InvalidQuantity { quantity: 0 })
        ));

        let reservation = flow.reserve_stock(product.id, 3).await.unwrap();
        flow.commit_reservation(reservation.id).await.unwrap();
        let stored = store.product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.quantity, 7);
    }
}
