//! Application configuration loaded from environment variables.

use common::Money;
use domain::{PricingConfig, WebhookPolicy};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `DATABASE_URL` — Postgres connection string (required to run the binary)
/// - `JWT_SECRET` — HS256 secret for bearer token validation
/// - `TAX_RATE_BASIS_POINTS` — tax rate, 1900 = 19% (default: `1900`)
/// - `SHIPPING_COST_CENTS` — flat shipping in cents (default: `1500000`)
/// - `CURRENCY` — ISO currency code (default: `"COP"`)
/// - `PAYU_API_KEY`, `PAYU_MERCHANT_ID` — gateway credentials for webhook
///   signature verification
/// - `CANCEL_ON_EXPIRED`, `CANCEL_ON_ABANDONED` — webhook policy flags
///   (default: `true`)
/// - `OUTBOX_POLL_SECS` — notification worker poll interval (default: `15`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub tax_rate_basis_points: u32,
    pub shipping_cost_cents: i64,
    pub currency: String,
    pub payu_api_key: String,
    pub payu_merchant_id: String,
    pub cancel_on_expired: bool,
    pub cancel_on_abandoned: bool,
    pub outbox_poll_secs: u64,
    pub log_level: String,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", 3000),
            database_url: std::env::var("DATABASE_URL").ok(),
            jwt_secret: std::env::var("JWT_SECRET")
                .unwrap_or_else(|_| "dev-secret-change-me".to_string()),
            tax_rate_basis_points: env_or("TAX_RATE_BASIS_POINTS", 1_900),
            shipping_cost_cents: env_or("SHIPPING_COST_CENTS", 1_500_000),
            currency: std::env::var("CURRENCY").unwrap_or_else(|_| "COP".to_string()),
            payu_api_key: std::env::var("PAYU_API_KEY").unwrap_or_default(),
            payu_merchant_id: std::env::var("PAYU_MERCHANT_ID").unwrap_or_default(),
            cancel_on_expired: env_or("CANCEL_ON_EXPIRED", true),
            cancel_on_abandoned: env_or("CANCEL_ON_ABANDONED", true),
            outbox_poll_secs: env_or("OUTBOX_POLL_SECS", 15),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Checkout pricing parameters.
    pub fn pricing(&self) -> PricingConfig {
        PricingConfig {
            tax_rate_basis_points: self.tax_rate_basis_points,
            shipping_cost: Money::from_cents(self.shipping_cost_cents),
        }
    }

    /// Gateway webhook policy.
    pub fn webhook_policy(&self) -> WebhookPolicy {
        WebhookPolicy {
            cancel_on_expired: self.cancel_on_expired,
            cancel_on_abandoned: self.cancel_on_abandoned,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            jwt_secret: "dev-secret-change-me".to_string(),
            tax_rate_basis_points: 1_900,
            shipping_cost_cents: 1_500_000,
            currency: "COP".to_string(),
            payu_api_key: String::new(),
            payu_merchant_id: String::new(),
            cancel_on_expired: true,
            cancel_on_abandoned: true,
            outbox_poll_secs: 15,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.tax_rate_basis_points, 1_900);
        assert_eq!(config.shipping_cost_cents, 1_500_000);
        assert_eq!(config.currency, "COP");
        assert!(config.cancel_on_expired);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_pricing_uses_configured_values() {
        let config = Config::default();
        let pricing = config.pricing();
        assert_eq!(pricing.tax_rate_basis_points, 1_900);
        assert_eq!(pricing.shipping_cost, Money::from_units(15_000));
    }
}
