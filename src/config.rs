use std::env;
use std::fmt;
use std::time::Duration;

use crate::error::AppError;

/// Wraps credentials so they never end up in logs or `Debug` output.
#[derive(Clone, Default, PartialEq)]
pub struct Secret<T>
where
    T: Clone + Default,
{
    value: T,
}

impl<T: Clone + Default> Secret<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }

    pub fn reveal(&self) -> &T {
        &self.value
    }
}

impl<T: Clone + Default> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

impl<T: Clone + Default> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

/// Credentials for the push-payout rails. A rail without a key cannot be
/// used for settlement.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub bank_api_key: Option<Secret<String>>,
    pub cashapp_api_key: Option<Secret<String>>,
    pub paypal_api_key: Option<Secret<String>>,
    pub card_api_key: Option<Secret<String>>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub order_queue_size: usize,
    pub event_buffer_size: usize,
    pub offer_window_secs: u64,
    pub max_dispatch_attempts: u32,
    pub dispatch_retry_interval_ms: u64,
    pub expiry_sweep_interval_ms: u64,
    pub enforce_pickup_geofence: bool,
    pub auto_pickup_on_arrival: bool,
    pub settlement_hour_utc: u32,
    pub provider_timeout_secs: u64,
    pub credentials: ProviderCredentials,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            order_queue_size: 1024,
            event_buffer_size: 1024,
            offer_window_secs: 30,
            max_dispatch_attempts: 5,
            dispatch_retry_interval_ms: 5000,
            expiry_sweep_interval_ms: 1000,
            enforce_pickup_geofence: false,
            auto_pickup_on_arrival: false,
            settlement_hour_utc: 2,
            provider_timeout_secs: 10,
            credentials: ProviderCredentials::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let settlement_hour_utc = parse_or_default("SETTLEMENT_HOUR_UTC", defaults.settlement_hour_utc)?;
        if settlement_hour_utc > 23 {
            return Err(AppError::Internal(format!(
                "invalid SETTLEMENT_HOUR_UTC: {settlement_hour_utc} is not an hour of the day"
            )));
        }

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            order_queue_size: parse_or_default("ORDER_QUEUE_SIZE", defaults.order_queue_size)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            offer_window_secs: parse_or_default("OFFER_WINDOW_SECS", defaults.offer_window_secs)?,
            max_dispatch_attempts: parse_or_default(
                "MAX_DISPATCH_ATTEMPTS",
                defaults.max_dispatch_attempts,
            )?,
            dispatch_retry_interval_ms: parse_or_default(
                "DISPATCH_RETRY_INTERVAL_MS",
                defaults.dispatch_retry_interval_ms,
            )?,
            expiry_sweep_interval_ms: parse_or_default(
                "EXPIRY_SWEEP_INTERVAL_MS",
                defaults.expiry_sweep_interval_ms,
            )?,
            enforce_pickup_geofence: parse_or_default(
                "ENFORCE_PICKUP_GEOFENCE",
                defaults.enforce_pickup_geofence,
            )?,
            auto_pickup_on_arrival: parse_or_default(
                "AUTO_PICKUP_ON_ARRIVAL",
                defaults.auto_pickup_on_arrival,
            )?,
            settlement_hour_utc,
            provider_timeout_secs: parse_or_default(
                "PROVIDER_TIMEOUT_SECS",
                defaults.provider_timeout_secs,
            )?,
            credentials: ProviderCredentials {
                bank_api_key: secret_from_env("BANK_API_KEY"),
                cashapp_api_key: secret_from_env("CASHAPP_API_KEY"),
                paypal_api_key: secret_from_env("PAYPAL_API_KEY"),
                card_api_key: secret_from_env("CARD_API_KEY"),
            },
        })
    }

    pub fn offer_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.offer_window_secs as i64)
    }

    pub fn dispatch_retry_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_retry_interval_ms)
    }

    pub fn expiry_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.expiry_sweep_interval_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

fn secret_from_env(key: &str) -> Option<Secret<String>> {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(Secret::new)
}

#[cfg(test)]
mod tests {
    use super::{Config, Secret};

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let secret = Secret::new("sk_live_123".to_string());
        assert_eq!(format!("{secret:?}"), "****");
        assert_eq!(secret.reveal(), "sk_live_123");
    }

    #[test]
    fn default_offer_window_is_thirty_seconds() {
        let config = Config::default();
        assert_eq!(config.offer_window().num_seconds(), 30);
        assert_eq!(config.max_dispatch_attempts, 5);
    }
}
