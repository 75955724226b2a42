//! Configuration loaded from environment variables (and `.env` via dotenvy).

use chrono::Duration;
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::shipping::ShippingPolicy;
use crate::domain::value_objects::Money;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub port: u16,
    pub nats_url: Option<String>,
    pub payment: PaymentConfig,
    pub shipping: ShippingPolicy,
    /// How long stock stays held for an unpaid order.
    pub reservation_ttl: Duration,
    pub reservation_sweep_interval: std::time::Duration,
    /// A webhook stuck in PROCESSING longer than this may be reclaimed.
    pub webhook_stale_after: Duration,
}

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub api_key: String,
    pub webhook_secret: String,
    pub api_base: String,
    pub success_url: String,
    pub cancel_url: String,
    pub session_ttl: Duration,
    pub webhook_tolerance_secs: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = ShippingPolicy::default();
        Self {
            database_url: required("DATABASE_URL")?,
            max_connections: parsed("DATABASE_MAX_CONNECTIONS", 10)?,
            port: parsed("PORT", 8083)?,
            nats_url: env::var("NATS_URL").ok().filter(|s| !s.is_empty()),
            payment: PaymentConfig {
                api_key: required("PAYMENT_API_KEY")?,
                webhook_secret: required("PAYMENT_WEBHOOK_SECRET")?,
                api_base: env::var("PAYMENT_API_BASE").unwrap_or_else(|_| "https://api.stripe.com".to_string()),
                success_url: env::var("CHECKOUT_SUCCESS_URL")
                    .unwrap_or_else(|_| "http://localhost:3000/checkout/success?session_id={CHECKOUT_SESSION_ID}".to_string()),
                cancel_url: env::var("CHECKOUT_CANCEL_URL").unwrap_or_else(|_| "http://localhost:3000/checkout".to_string()),
                // the provider refuses sessions shorter than 30 minutes
                session_ttl: Duration::minutes(parsed::<i64>("CHECKOUT_SESSION_TTL_MINUTES", 60)?.max(30)),
                webhook_tolerance_secs: parsed("PAYMENT_WEBHOOK_TOLERANCE_SECONDS", 300)?,
            },
            shipping: ShippingPolicy {
                domestic_rate: money("SHIPPING_DOMESTIC_RATE", defaults.domestic_rate)?,
                free_domestic_threshold: money("SHIPPING_FREE_THRESHOLD", defaults.free_domestic_threshold)?,
                us_rate: money("SHIPPING_US_RATE", defaults.us_rate)?,
                international_rate: money("SHIPPING_INTERNATIONAL_RATE", defaults.international_rate)?,
            },
            reservation_ttl: Duration::minutes(parsed("RESERVATION_TTL_MINUTES", 90)?),
            reservation_sweep_interval: std::time::Duration::from_secs(parsed("RESERVATION_SWEEP_SECONDS", 300)?),
            webhook_stale_after: Duration::minutes(parsed("WEBHOOK_STALE_MINUTES", 30)?),
        }
        .validated()
    }

    /// Holds must outlive the payment session.
    fn validated(self) -> Result<Self, ConfigError> {
        if self.reservation_sweep_interval.is_zero() {
            return Err(ConfigError::Invalid { var: "RESERVATION_SWEEP_SECONDS", value: "0".into() });
        }
        if self.reservation_ttl < self.payment.session_ttl {
            return Err(ConfigError::Invalid {
                var: "RESERVATION_TTL_MINUTES",
                value: format!("{} (shorter than the {} minute session)", self.reservation_ttl.num_minutes(), self.payment.session_ttl.num_minutes()),
            });
        }
        if self.webhook_stale_after <= Duration::zero() {
            return Err(ConfigError::Invalid { var: "WEBHOOK_STALE_MINUTES", value: self.webhook_stale_after.num_minutes().to_string() });
        }
        Ok(self)
    }
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    env::var(var).ok().filter(|v| !v.is_empty()).ok_or(ConfigError::Missing(var))
}

fn parsed<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { var, value }),
        Err(_) => Ok(default),
    }
}

/// Dollar amounts, e.g. `SHIPPING_DOMESTIC_RATE=15.00`.
fn money(var: &'static str, default: Money) -> Result<Money, ConfigError> {
    match env::var(var) {
        Ok(value) => match Decimal::from_str(value.trim()) {
            Ok(amount) if amount >= Decimal::ZERO => Ok(Money::cad(amount)),
            _ => Err(ConfigError::Invalid { var, value }),
        },
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_default_and_invalid() {
        assert_eq!(parsed::<u16>("PEPTIDE_TEST_UNSET_PORT", 8083).unwrap(), 8083);
        env::set_var("PEPTIDE_TEST_BAD_PORT", "eighty");
        assert!(matches!(parsed::<u16>("PEPTIDE_TEST_BAD_PORT", 1), Err(ConfigError::Invalid { .. })));
    }

    fn config() -> Config {
        Config {
            database_url: "postgres://localhost/checkout".into(),
            max_connections: 10,
            port: 8083,
            nats_url: None,
            payment: PaymentConfig {
                api_key: "sk_test".into(),
                webhook_secret: "whsec_test".into(),
                api_base: "https://api.stripe.com".into(),
                success_url: "http://localhost:3000/checkout/success".into(),
                cancel_url: "http://localhost:3000/checkout".into(),
                session_ttl: Duration::minutes(60),
                webhook_tolerance_secs: 300,
            },
            shipping: ShippingPolicy::default(),
            reservation_ttl: Duration::minutes(90),
            reservation_sweep_interval: std::time::Duration::from_secs(300),
            webhook_stale_after: Duration::minutes(30),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(config().validated().is_ok());
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let mut c = config();
        c.reservation_sweep_interval = std::time::Duration::ZERO;
        assert!(matches!(c.validated(), Err(ConfigError::Invalid { var: "RESERVATION_SWEEP_SECONDS", .. })));
    }

    #[test]
    fn test_reservation_must_outlive_session() {
        let mut c = config();
        c.reservation_ttl = Duration::minutes(45);
        assert!(matches!(c.validated(), Err(ConfigError::Invalid { var: "RESERVATION_TTL_MINUTES", .. })));
        let mut c = config();
        c.reservation_ttl = Duration::minutes(60);
        assert!(c.validated().is_ok());
    }

    #[test]
    fn test_money_var() {
        env::set_var("PEPTIDE_TEST_RATE", "12.5");
        assert_eq!(money("PEPTIDE_TEST_RATE", Money::default()).unwrap().cents(), 1250);
        env::set_var("PEPTIDE_TEST_NEG_RATE", "-1");
        assert!(money("PEPTIDE_TEST_NEG_RATE", Money::default()).is_err());
    }
}
