//! HTTP surface for the checkout service.
//!
//! Exposes checkout entry points, the payment provider's callback
//! routes, session and order views, and observability endpoints, with
//! structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use checkout::{CheckoutConfig, CheckoutFlow, PaymentGateway};
use commerce_store::CommerceStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::checkout::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, G>(state: Arc<AppState<S, G>>, metrics_handle: PrometheusHandle) -> Router
where
    S: CommerceStore + 'static,
    G: PaymentGateway + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/checkout/cart", post(routes::checkout::begin_cart::<S, G>))
        .route(
            "/checkout/product/{id}",
            post(routes::checkout::begin_product::<S, G>),
        )
        .route("/checkout/confirm", get(routes::checkout::confirm::<S, G>))
        .route("/checkout/cancel", get(routes::checkout::cancel::<S, G>))
        .route("/sessions/{id}", get(routes::checkout::session::<S, G>))
        .route(
            "/users/{id}/orders",
            get(routes::checkout::user_orders::<S, G>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates shared application state wiring a checkout flow over the given
/// store and payment gateway.
pub fn create_state<S, G>(store: S, gateway: G, config: CheckoutConfig) -> Arc<AppState<S, G>>
where
    S: CommerceStore + 'static,
    G: PaymentGateway + 'static,
{
    Arc::new(AppState {
        flow: CheckoutFlow::new(store, gateway, config),
    })
}
