//! Payment session state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::{Money, SessionId, UserId};

use crate::CartSnapshot;

/// The state of a payment session in its lifecycle.
///
/// State transitions:
/// ```text
/// Initiated ──► StockValidated ──► AwaitingPayment ──► Executed
///     │                │                  │
///     └────────────────┴──────────────────┴──► Failed
///
/// any non-terminal state ──(timeout sweep)──► Abandoned
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Checkout started: the snapshot is frozen and the session persisted.
    #[default]
    Initiated,

    /// Every snapshot line passed the stock availability check.
    StockValidated,

    /// Handed to the external payment authority; waiting for its callback.
    AwaitingPayment,

    /// Payment confirmed and orders materialized (terminal state).
    Executed,

    /// Checkout failed: stock shortfall, refused authorization, rejected
    /// execution, or payer cancellation (terminal state).
    Failed,

    /// Timed out without reaching a terminal state (terminal state).
    Abandoned,
}

impl SessionState {
    /// Returns true if the stock check may run in this state.
    pub fn can_validate(&self) -> bool {
        matches!(self, SessionState::Initiated)
    }

    /// Returns true if the session can be handed to the payment authority.
    pub fn can_await_payment(&self) -> bool {
        matches!(self, SessionState::StockValidated)
    }

    /// Returns true if a confirmation callback can execute this session.
    pub fn can_execute(&self) -> bool {
        matches!(self, SessionState::AwaitingPayment)
    }

    /// Returns true if the session can be marked failed in this state.
    pub fn can_fail(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if the timeout sweep can abandon this state.
    pub fn can_abandon(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if this is a terminal state (the session is inert).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Executed | SessionState::Failed | SessionState::Abandoned
        )
    }

    /// Returns the state name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Initiated => "initiated",
            SessionState::StockValidated => "stock_validated",
            SessionState::AwaitingPayment => "awaiting_payment",
            SessionState::Executed => "executed",
            SessionState::Failed => "failed",
            SessionState::Abandoned => "abandoned",
        }
    }

    /// Parses a stored state name back into a state.
    pub fn parse(value: &str) -> Option<SessionState> {
        match value {
            "initiated" => Some(SessionState::Initiated),
            "stock_validated" => Some(SessionState::StockValidated),
            "awaiting_payment" => Some(SessionState::AwaitingPayment),
            "executed" => Some(SessionState::Executed),
            "failed" => Some(SessionState::Failed),
            "abandoned" => Some(SessionState::Abandoned),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a checkout covers the whole live cart or a single product bought
/// directly. Decides whether materialization clears cart lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutKind {
    /// The snapshot was taken from the live cart; purchased lines are
    /// deleted on execution.
    Cart,

    /// A single product bought directly; the live cart is never touched.
    Product,
}

impl CheckoutKind {
    /// Returns the kind name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutKind::Cart => "cart",
            CheckoutKind::Product => "product",
        }
    }

    /// Parses a stored kind name back into a kind.
    pub fn parse(value: &str) -> Option<CheckoutKind> {
        match value {
            "cart" => Some(CheckoutKind::Cart),
            "product" => Some(CheckoutKind::Product),
            _ => None,
        }
    }
}

impl std::fmt::Display for CheckoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One checkout attempt, persisted.
///
/// Binds the frozen snapshot, the computed total, and the external provider
/// reference together so the confirmation callback is a transition on stored
/// state. Once terminal the session is kept for audit and never reopened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub kind: CheckoutKind,
    pub snapshot: CartSnapshot,
    pub total: Money,
    /// Opaque token issued by the external payment authority, set when the
    /// session starts awaiting payment.
    pub provider_ref: Option<String>,
    pub state: SessionState,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentSession {
    /// Opens a new session in the `Initiated` state, computing the total
    /// from the snapshot.
    pub fn open(user_id: UserId, kind: CheckoutKind, snapshot: CartSnapshot) -> Self {
        let total = snapshot.total();
        Self {
            id: SessionId::new(),
            user_id,
            kind,
            snapshot,
            total,
            provider_ref: None,
            state: SessionState::Initiated,
            failure_reason: None,
            created_at: Utc::now(),
        }
    }
}
