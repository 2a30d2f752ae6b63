//! Checkout service entry point.

use api::config::Config;
use checkout::{InMemoryGateway, PaymentGateway, RestGateway};
use commerce_store::{CommerceStore, InMemoryStore, PostgresStore};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn connect_postgres(database_url: &str) -> PostgresStore {
    let store = PostgresStore::connect(database_url)
        .await
        .expect("failed to connect to Postgres");
    store
        .run_migrations()
        .await
        .expect("failed to run migrations");
    tracing::info!("connected to Postgres");
    store
}

/// Spawns the sweeper, builds the router, and serves until shutdown.
async fn run<S, G>(store: S, gateway: G, config: Config, metrics_handle: PrometheusHandle)
where
    S: CommerceStore + 'static,
    G: PaymentGateway + 'static,
{
    let state = api::create_state(store, gateway, config.checkout_config());

    // Background sweeper: abandons stale sessions, reclaims expired
    // reservations
    let sweeper_state = state.clone();
    let sweep_interval = std::time::Duration::from_secs(config.sweep_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = sweeper_state.flow.sweep_expired().await {
                tracing::warn!(error = %e, "sweep pass failed");
            }
        }
    });

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting checkout service");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the store and payment gateway from configuration
    if config.database_url.is_none() {
        tracing::warn!("DATABASE_URL not set, using in-memory store");
    }
    if config.payment_api_url.is_none() {
        tracing::warn!("PAYMENT_API_URL not set, using in-memory payment gateway");
    }

    match (config.database_url.clone(), config.payment_api_url.clone()) {
        (Some(db), Some(payments)) => {
            let store = connect_postgres(&db).await;
            run(store, RestGateway::new(payments), config, metrics_handle).await;
        }
        (Some(db), None) => {
            let store = connect_postgres(&db).await;
            run(store, InMemoryGateway::new(), config, metrics_handle).await;
        }
        (None, Some(payments)) => {
            let store = InMemoryStore::new();
            run(store, RestGateway::new(payments), config, metrics_handle).await;
        }
        (None, None) => {
            let store = InMemoryStore::new();
            run(store, InMemoryGateway::new(), config, metrics_handle).await;
        }
    }
}
