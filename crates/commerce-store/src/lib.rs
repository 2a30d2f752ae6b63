//! Storage layer for the checkout service.
//!
//! Defines the [`CommerceStore`] trait over the catalog, carts, payment
//! sessions, orders, and the stock reservation ledger, along with an
//! in-memory backend for tests and a PostgreSQL backend for production.

pub mod error;
pub mod memory;
pub mod order;
pub mod postgres;
pub mod product;
pub mod reservation;
pub mod session;
pub mod snapshot;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use order::Order;
pub use postgres::PostgresStore;
pub use product::{CartLine, Product};
pub use reservation::StockReservation;
pub use session::{CheckoutKind, PaymentSession, SessionState};
pub use snapshot::{CartSnapshot, SnapshotLine};
pub use store::{CheckoutCommit, CommerceStore, CommerceStoreExt};
