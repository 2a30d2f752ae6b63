//! Application configuration loaded from environment variables.

use checkout::CheckoutConfig;
use chrono::Duration;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` — Postgres connection string; the in-memory store is
///   used when unset
/// - `PAYMENT_API_URL` — payment provider base URL; the in-memory gateway
///   is used when unset
/// - `PAYMENT_RETURN_URL` / `PAYMENT_CANCEL_URL` — callback URLs
///   registered with the provider
/// - `CURRENCY` — ISO 4217 code for payments (default: `"USD"`)
/// - `SESSION_TTL_SECS` — checkout validity window (default: `900`)
/// - `RESERVATION_TTL_SECS` — stock reservation lifetime (default: `600`)
/// - `SWEEP_INTERVAL_SECS` — sweeper period (default: `60`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub payment_api_url: Option<String>,
    pub return_url: String,
    pub cancel_url: String,
    pub currency: String,
    pub session_ttl_secs: u64,
    pub reservation_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        Self {
            host: env_or("HOST", "0.0.0.0"),
            port,
            log_level: env_or("RUST_LOG", "info"),
            database_url: std::env::var("DATABASE_URL").ok(),
            payment_api_url: std::env::var("PAYMENT_API_URL").ok(),
            return_url: env_or(
                "PAYMENT_RETURN_URL",
                &format!("http://localhost:{port}/checkout/confirm"),
            ),
            cancel_url: env_or(
                "PAYMENT_CANCEL_URL",
                &format!("http://localhost:{port}/checkout/cancel"),
            ),
            currency: env_or("CURRENCY", "USD"),
            session_ttl_secs: std::env::var("SESSION_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(900),
            reservation_ttl_secs: std::env::var("RESERVATION_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(600),
            sweep_interval_secs: std::env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds the checkout flow configuration.
    pub fn checkout_config(&self) -> CheckoutConfig {
        CheckoutConfig {
            session_ttl: Duration::seconds(self.session_ttl_secs as i64),
            reservation_ttl: Duration::seconds(self.reservation_ttl_secs as i64),
            return_url: self.return_url.clone(),
            cancel_url: self.cancel_url.clone(),
            currency: self.currency.clone(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            payment_api_url: None,
            return_url: "http://localhost:3000/checkout/confirm".to_string(),
            cancel_url: "http://localhost:3000/checkout/cancel".to_string(),
            currency: "USD".to_string(),
            session_ttl_secs: 900,
            reservation_ttl_secs: 600,
            sweep_interval_secs: 60,
        }
    }
}
