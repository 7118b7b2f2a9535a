//! Application configuration

use std::env;
use std::time::Duration;

use widgetstore_checkout::{GatewayCredential, InvoiceConfig};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,
    /// Bound on every repository statement
    pub repository_timeout: Duration,

    // Stripe
    pub stripe_secret_key: String,
    pub stripe_publishable_key: String,

    // Invoicing
    pub invoice: InvoiceConfig,

    // Logging
    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:4001".to_string()),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            repository_timeout: Duration::from_secs(
                env::var("REPOSITORY_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .unwrap_or(3),
            ),

            // Stripe
            stripe_secret_key: env::var("STRIPE_SECRET_KEY")
                .map_err(|_| ConfigError::Missing("STRIPE_SECRET_KEY"))?,
            stripe_publishable_key: env::var("STRIPE_PUBLISHABLE_KEY")
                .map_err(|_| ConfigError::Missing("STRIPE_PUBLISHABLE_KEY"))?,

            // Invoicing
            invoice: InvoiceConfig::from_env(),

            // Logging
            log_json: env::var("LOG_FORMAT")
                .map(|format| format.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }

    pub fn gateway_credential(&self) -> GatewayCredential {
        GatewayCredential::new(&self.stripe_secret_key, &self.stripe_publishable_key)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn setup_minimal_config() {
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var("STRIPE_SECRET_KEY", "sk_test_config");
        env::set_var("STRIPE_PUBLISHABLE_KEY", "pk_test_config");
    }

    fn cleanup_config() {
        for key in [
            "DATABASE_URL",
            "STRIPE_SECRET_KEY",
            "STRIPE_PUBLISHABLE_KEY",
            "REPOSITORY_TIMEOUT_SECS",
            "INVOICE_SERVICE_URL",
            "INVOICE_TIMEOUT_SECS",
            "LOG_FORMAT",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        cleanup_config();
        setup_minimal_config();

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:4001");
        assert_eq!(config.repository_timeout, Duration::from_secs(3));
        assert_eq!(config.invoice.timeout, Duration::from_secs(5));
        assert_eq!(
            config.invoice.service_url,
            "http://localhost:4002/v1/invoice/create-and-send"
        );
        assert!(!config.log_json);
        assert_eq!(config.gateway_credential().secret(), "sk_test_config");

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_overrides() {
        cleanup_config();
        setup_minimal_config();
        env::set_var("REPOSITORY_TIMEOUT_SECS", "7");
        env::set_var("INVOICE_SERVICE_URL", "http://invoices:9000/create");
        env::set_var("INVOICE_TIMEOUT_SECS", "not-a-number");
        env::set_var("LOG_FORMAT", "JSON");

        let config = Config::from_env().unwrap();
        assert_eq!(config.repository_timeout, Duration::from_secs(7));
        assert_eq!(config.invoice.service_url, "http://invoices:9000/create");
        assert_eq!(config.invoice.timeout, Duration::from_secs(5));
        assert!(config.log_json);

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_missing_stripe_key() {
        cleanup_config();
        env::set_var("DATABASE_URL", "postgres://test");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("STRIPE_SECRET_KEY")));

        cleanup_config();
    }
}
