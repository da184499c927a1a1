//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development. Reminder windows and delivery retry
//! constants are configuration with documented defaults, not literals in the
//! engine.

use std::net::SocketAddr;
use std::time::Duration;

use care_scheduling_core::dispatch::RetryPolicy;
use care_scheduling_core::domain::ChannelKind;
use care_scheduling_core::reminder::ReminderConfig;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// When unset the service runs on the in-memory stores.
    pub database_url: Option<String>,
    pub log_level: Level,

    // Reminder derivation
    pub reminder_pre_days: i64,
    pub reminder_post_days: i64,
    pub sweep_interval: Duration,
    pub default_channel: ChannelKind,

    // Delivery retry
    pub delivery_max_attempts: u32,
    pub delivery_base_delay: Duration,
    pub delivery_max_delay: Duration,
    pub delivery_attempt_timeout: Duration,

    // Channel endpoints (a channel is only registered when configured)
    pub messaging_webhook_url: Option<String>,
    pub email_api_url: Option<String>,
    pub email_api_key: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Server and logging ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL").ok();

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Reminder derivation ---
        let reminder_pre_days = parse_or("REMINDER_PRE_DAYS", 3)?;
        let reminder_post_days = parse_or("REMINDER_POST_DAYS", 3)?;
        let sweep_secs: u64 = parse_or("REMINDER_SWEEP_SECS", 300)?;
        if sweep_secs == 0 {
            // A zero-period interval is a runtime panic in the sweep task.
            return Err(ConfigError::InvalidValue(
                "REMINDER_SWEEP_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let sweep_interval = Duration::from_secs(sweep_secs);

        let channel_str =
            std::env::var("REMINDER_CHANNEL").unwrap_or_else(|_| "in_app".to_string());
        let default_channel = ChannelKind::parse(&channel_str).ok_or_else(|| {
            ConfigError::InvalidValue(
                "REMINDER_CHANNEL".to_string(),
                format!("'{}' is not a known channel", channel_str),
            )
        })?;

        // --- Delivery retry ---
        let delivery_max_attempts = parse_or("DELIVERY_MAX_ATTEMPTS", 5)?;
        let delivery_base_delay = Duration::from_millis(parse_or("DELIVERY_BASE_DELAY_MS", 500)?);
        let delivery_max_delay = Duration::from_secs(parse_or("DELIVERY_MAX_DELAY_SECS", 30)?);
        let delivery_attempt_timeout =
            Duration::from_secs(parse_or("DELIVERY_ATTEMPT_TIMEOUT_SECS", 10)?);

        // --- Channel endpoints ---
        let messaging_webhook_url = std::env::var("MESSAGING_WEBHOOK_URL").ok();
        let email_api_url = std::env::var("EMAIL_API_URL").ok();
        let email_api_key = std::env::var("EMAIL_API_KEY").ok();

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            reminder_pre_days,
            reminder_post_days,
            sweep_interval,
            default_channel,
            delivery_max_attempts,
            delivery_base_delay,
            delivery_max_delay,
            delivery_attempt_timeout,
            messaging_webhook_url,
            email_api_url,
            email_api_key,
        })
    }

    pub fn reminder_config(&self) -> ReminderConfig {
        ReminderConfig {
            pre_window_days: self.reminder_pre_days,
            post_window_days: self.reminder_post_days,
            default_channel: self.default_channel,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.delivery_max_attempts,
            base_delay: self.delivery_base_delay,
            max_delay: self.delivery_max_delay,
            attempt_timeout: self.delivery_attempt_timeout,
        }
    }
}

/// Parses an optional environment variable, falling back to `default`.
fn parse_or<T: std::str::FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(var.to_string(), raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sweep_interval_is_rejected() {
        std::env::set_var("REMINDER_SWEEP_SECS", "0");
        let result = Config::from_env();
        std::env::remove_var("REMINDER_SWEEP_SECS");

        let err = result.unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue(ref var, _) if var == "REMINDER_SWEEP_SECS")
        );
    }
}
