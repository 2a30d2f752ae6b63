use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use common::{Money, OrderId, ProductId, ReservationId, SessionId, UserId};

use crate::{
    CartLine, CheckoutKind, Order, PaymentSession, Product, Result, SessionState,
    StockReservation, StoreError,
    store::{CheckoutCommit, CommerceStore},
};

/// PostgreSQL-backed store implementation.
///
/// All multi-statement operations run inside explicit transactions; stock
/// mutation goes through guarded conditional updates so concurrent
/// checkouts serialize on the product row instead of racing a read.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the given database URL with a default pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn parse_state(raw: String) -> Result<SessionState> {
        SessionState::parse(&raw).ok_or(StoreError::UnknownSessionState(raw))
    }

    fn parse_kind(raw: String) -> Result<CheckoutKind> {
        CheckoutKind::parse(&raw).ok_or(StoreError::UnknownCheckoutKind(raw))
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        Ok(Product {
            id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
            quantity: row.try_get::<i32, _>("quantity")? as u32,
            reserved: row.try_get::<i32, _>("reserved")? as u32,
        })
    }

    fn row_to_cart_line(row: PgRow) -> Result<CartLine> {
        Ok(CartLine {
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            quantity: row.try_get::<i32, _>("quantity")? as u32,
        })
    }

    fn row_to_session(row: PgRow) -> Result<PaymentSession> {
        let snapshot_json: serde_json::Value = row.try_get("snapshot")?;

        Ok(PaymentSession {
            id: SessionId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            kind: Self::parse_kind(row.try_get("kind")?)?,
            snapshot: serde_json::from_value(snapshot_json)?,
            total: Money::from_cents(row.try_get("total_cents")?),
            provider_ref: row.try_get("provider_ref")?,
            state: Self::parse_state(row.try_get("state")?)?,
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            quantity: row.try_get::<i32, _>("quantity")? as u32,
            total: Money::from_cents(row.try_get("total_cents")?),
            payment_ref: row.try_get("payment_ref")?,
            payer_ref: row.try_get("payer_ref")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn current_session_state(&self, id: SessionId) -> Result<Option<SessionState>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT state FROM payment_sessions WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        match raw {
            Some(raw) => Ok(Some(Self::parse_state(raw)?)),
            None => Ok(None),
        }
    }

    /// Builds the error for a guarded session update that matched no row.
    async fn session_conflict(&self, id: SessionId, attempted: SessionState) -> StoreError {
        match self.current_session_state(id).await {
            Ok(Some(actual)) => StoreError::SessionStateConflict {
                session_id: id,
                attempted,
                actual,
            },
            Ok(None) => StoreError::SessionNotFound(id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl CommerceStore for PostgresStore {
    async fn insert_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, unit_price_cents, quantity, reserved)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                unit_price_cents = EXCLUDED.unit_price_cents,
                quantity = EXCLUDED.quantity,
                reserved = EXCLUDED.reserved
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.unit_price.cents())
        .bind(product.quantity as i32)
        .bind(product.reserved as i32)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, unit_price_cents, quantity, reserved
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn upsert_cart_line(&self, line: &CartLine) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cart_lines (user_id, product_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, product_id) DO UPDATE SET quantity = EXCLUDED.quantity
            "#,
        )
        .bind(line.user_id.as_uuid())
        .bind(line.product_id.as_uuid())
        .bind(line.quantity as i32)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn cart_lines(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, product_id, quantity
            FROM cart_lines
            WHERE user_id = $1
            ORDER BY product_id ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_cart_line).collect()
    }

    async fn delete_cart_line(&self, user_id: UserId, product_id: ProductId) -> Result<()> {
        sqlx::query("DELETE FROM cart_lines WHERE user_id = $1 AND product_id = $2")
            .bind(user_id.as_uuid())
            .bind(product_id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn reserve_stock(
        &self,
        product_id: ProductId,
        quantity: u32,
        expires_at: DateTime<Utc>,
    ) -> Result<StockReservation> {
        let mut tx = self.pool.begin().await?;

        // The guard predicate is the atomic primitive: the earmark only
        // lands when unreserved stock still covers the request.
        let claimed = sqlx::query(
            r#"
            UPDATE products
            SET reserved = reserved + $2
            WHERE id = $1 AND quantity - reserved >= $2
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(quantity as i32)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            let row = sqlx::query("SELECT quantity, reserved FROM products WHERE id = $1")
                .bind(product_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;

            return Err(match row {
                Some(row) => {
                    let quantity: i32 = row.try_get("quantity")?;
                    let reserved: i32 = row.try_get("reserved")?;
                    StoreError::InsufficientStock {
                        product_id,
                        available: (quantity - reserved).max(0) as u32,
                    }
                }
                None => StoreError::ProductNotFound(product_id),
            });
        }

        let reservation = StockReservation::new(product_id, quantity, expires_at);
        sqlx::query(
            r#"
            INSERT INTO stock_reservations (id, product_id, quantity, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.product_id.as_uuid())
        .bind(reservation.quantity as i32)
        .bind(reservation.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(reservation)
    }

    async fn commit_reservation(&self, reservation_id: ReservationId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // DELETE..RETURNING is the single-claim primitive: only one caller
        // can ever see the handle, so a commit cannot apply twice.
        let row = sqlx::query(
            "DELETE FROM stock_reservations WHERE id = $1 RETURNING product_id, quantity",
        )
        .bind(reservation_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(StoreError::ReservationNotFound(reservation_id));
        };
        let product_id: Uuid = row.try_get("product_id")?;
        let quantity: i32 = row.try_get("quantity")?;

        sqlx::query("UPDATE products SET quantity = quantity - $2, reserved = reserved - $2 WHERE id = $1")
            .bind(product_id)
            .bind(quantity)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn release_reservation(&self, reservation_id: ReservationId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "DELETE FROM stock_reservations WHERE id = $1 RETURNING product_id, quantity",
        )
        .bind(reservation_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = row {
            let product_id: Uuid = row.try_get("product_id")?;
            let quantity: i32 = row.try_get("quantity")?;

            sqlx::query("UPDATE products SET reserved = reserved - $2 WHERE id = $1")
                .bind(product_id)
                .bind(quantity)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn reclaim_expired_reservations(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            "DELETE FROM stock_reservations WHERE expires_at <= $1 RETURNING product_id, quantity",
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        for row in &rows {
            let product_id: Uuid = row.try_get("product_id")?;
            let quantity: i32 = row.try_get("quantity")?;

            sqlx::query("UPDATE products SET reserved = reserved - $2 WHERE id = $1")
                .bind(product_id)
                .bind(quantity)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    async fn insert_session(&self, session: &PaymentSession) -> Result<()> {
        let snapshot_json = serde_json::to_value(&session.snapshot)?;

        sqlx::query(
            r#"
            INSERT INTO payment_sessions
                (id, user_id, kind, snapshot, total_cents, provider_ref, state, failure_reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(session.user_id.as_uuid())
        .bind(session.kind.as_str())
        .bind(snapshot_json)
        .bind(session.total.cents())
        .bind(&session.provider_ref)
        .bind(session.state.as_str())
        .bind(&session.failure_reason)
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn session(&self, id: SessionId) -> Result<Option<PaymentSession>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, kind, snapshot, total_cents, provider_ref, state, failure_reason, created_at
            FROM payment_sessions
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_session).transpose()
    }

    async fn session_for_payment(&self, provider_ref: &str) -> Result<Option<PaymentSession>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, kind, snapshot, total_cents, provider_ref, state, failure_reason, created_at
            FROM payment_sessions
            WHERE provider_ref = $1
            "#,
        )
        .bind(provider_ref)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_session).transpose()
    }

    async fn mark_session_validated(&self, id: SessionId) -> Result<()> {
        let updated = sqlx::query("UPDATE payment_sessions SET state = $2 WHERE id = $1 AND state = $3")
            .bind(id.as_uuid())
            .bind(SessionState::StockValidated.as_str())
            .bind(SessionState::Initiated.as_str())
            .execute(&self.pool)
            .await?;

        if updated.rows_affected() == 0 {
            return Err(self.session_conflict(id, SessionState::StockValidated).await);
        }
        Ok(())
    }

    async fn mark_session_awaiting(&self, id: SessionId, provider_ref: &str) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE payment_sessions
            SET state = $2, provider_ref = $3
            WHERE id = $1 AND state = $4
            "#,
        )
        .bind(id.as_uuid())
        .bind(SessionState::AwaitingPayment.as_str())
        .bind(provider_ref)
        .bind(SessionState::StockValidated.as_str())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.session_conflict(id, SessionState::AwaitingPayment).await);
        }
        Ok(())
    }

    async fn mark_session_failed(&self, id: SessionId, reason: &str) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE payment_sessions
            SET state = $2, failure_reason = $3
            WHERE id = $1 AND state IN ('initiated', 'stock_validated', 'awaiting_payment')
            "#,
        )
        .bind(id.as_uuid())
        .bind(SessionState::Failed.as_str())
        .bind(reason)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.session_conflict(id, SessionState::Failed).await);
        }
        Ok(())
    }

    async fn abandon_stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let updated = sqlx::query(
            r#"
            UPDATE payment_sessions
            SET state = $2
            WHERE state IN ('initiated', 'stock_validated', 'awaiting_payment')
              AND created_at <= $1
            "#,
        )
        .bind(cutoff)
        .bind(SessionState::Abandoned.as_str())
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected())
    }

    async fn orders_for_payment(&self, payment_ref: &str) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, product_id, quantity, total_cents, payment_ref, payer_ref, created_at
            FROM orders
            WHERE payment_ref = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(payment_ref)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, product_id, quantity, total_cents, payment_ref, payer_ref, created_at
            FROM orders
            WHERE user_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn commit_checkout(&self, commit: CheckoutCommit) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Claim the session first. Concurrent confirmations serialize on
        // this row; exactly one caller sees rows_affected == 1.
        let claimed = sqlx::query("UPDATE payment_sessions SET state = $2 WHERE id = $1 AND state = $3")
            .bind(commit.session_id.as_uuid())
            .bind(SessionState::Executed.as_str())
            .bind(SessionState::AwaitingPayment.as_str())
            .execute(&mut *tx)
            .await?;

        if claimed.rows_affected() == 0 {
            return Err(self
                .session_conflict(commit.session_id, SessionState::Executed)
                .await);
        }

        for order in &commit.orders {
            // Fused reserve-and-commit: decrement succeeds only while
            // unreserved stock covers the line, else the whole transaction
            // rolls back.
            let decremented = sqlx::query(
                r#"
                UPDATE products
                SET quantity = quantity - $2
                WHERE id = $1 AND quantity - reserved >= $2
                "#,
            )
            .bind(order.product_id.as_uuid())
            .bind(order.quantity as i32)
            .execute(&mut *tx)
            .await?;

            if decremented.rows_affected() == 0 {
                let row = sqlx::query("SELECT quantity, reserved FROM products WHERE id = $1")
                    .bind(order.product_id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await?;

                return Err(match row {
                    Some(row) => {
                        let quantity: i32 = row.try_get("quantity")?;
                        let reserved: i32 = row.try_get("reserved")?;
                        StoreError::InsufficientStock {
                            product_id: order.product_id,
                            available: (quantity - reserved).max(0) as u32,
                        }
                    }
                    None => StoreError::ProductNotFound(order.product_id),
                });
            }

            sqlx::query(
                r#"
                INSERT INTO orders
                    (id, user_id, product_id, quantity, total_cents, payment_ref, payer_ref, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(order.user_id.as_uuid())
            .bind(order.product_id.as_uuid())
            .bind(order.quantity as i32)
            .bind(order.total.cents())
            .bind(&order.payment_ref)
            .bind(&order.payer_ref)
            .bind(order.created_at)
            .execute(&mut *tx)
            .await?;

            if commit.clear_cart {
                sqlx::query("DELETE FROM cart_lines WHERE user_id = $1 AND product_id = $2")
                    .bind(commit.user_id.as_uuid())
                    .bind(order.product_id.as_uuid())
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }
}
