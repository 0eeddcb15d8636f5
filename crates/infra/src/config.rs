//! Configuration loading.
//!
//! Every knob has a default; `FORGEERP_*` environment variables override them.
//! Durations are whole seconds unless the name says minutes.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use forgeerp_inventory::EngineConfig;
use forgeerp_locking::LockManagerConfig;
use forgeerp_observability::{LogFormat, LoggingConfig};
use forgeerp_reservations::LedgerConfig;

use crate::expiry_worker::ExpiryWorkerConfig;

pub const RESERVATION_DEFAULT_MINUTES: &str = "FORGEERP_RESERVATION_DEFAULT_MINUTES";
pub const RESERVATION_MAX_MINUTES: &str = "FORGEERP_RESERVATION_MAX_MINUTES";
pub const RESERVATION_MAX_RENEWALS: &str = "FORGEERP_RESERVATION_MAX_RENEWALS";
pub const RENEWAL_CEILING_STEP_MINUTES: &str = "FORGEERP_RENEWAL_CEILING_STEP_MINUTES";
pub const POSTING_WINDOW_SECS: &str = "FORGEERP_RESERVATION_POSTING_WINDOW_SECS";
pub const LOCK_LEASE_SECS: &str = "FORGEERP_LOCK_LEASE_SECS";
pub const LOCK_SWEEP_SECS: &str = "FORGEERP_LOCK_SWEEP_SECS";
pub const EXPIRY_INITIAL_DELAY_SECS: &str = "FORGEERP_EXPIRY_INITIAL_DELAY_SECS";
pub const EXPIRY_INTERVAL_SECS: &str = "FORGEERP_EXPIRY_INTERVAL_SECS";
pub const LOG_FORMAT: &str = "FORGEERP_LOG_FORMAT";

/// Upper bound on any configured duration (100 years).
pub const MAX_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Configuration of the whole reservation subsystem.
#[derive(Debug, Clone, Default)]
pub struct InventoryConfig {
    pub ledger: LedgerConfig,
    pub engine: EngineConfig,
    pub locks: LockManagerConfig,
    pub expiry: ExpiryWorkerConfig,
    pub logging: LoggingConfig,
}

impl InventoryConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let env = Lookup(&lookup);

        if let Some(m) = env.parse::<u64>(RESERVATION_DEFAULT_MINUTES)? {
            config.ledger.default_duration = minutes(RESERVATION_DEFAULT_MINUTES, m)?;
        }
        if let Some(m) = env.parse::<u64>(RESERVATION_MAX_MINUTES)? {
            config.ledger.max_duration = minutes(RESERVATION_MAX_MINUTES, m)?;
        }
        if let Some(n) = env.parse::<u32>(RESERVATION_MAX_RENEWALS)? {
            config.ledger.max_renewals = n;
        }
        if let Some(m) = env.parse::<u64>(RENEWAL_CEILING_STEP_MINUTES)? {
            config.ledger.renewal_ceiling_step = whole_minutes(RENEWAL_CEILING_STEP_MINUTES, m)?;
        }
        if let Some(s) = env.parse::<u64>(POSTING_WINDOW_SECS)? {
            config.ledger.posting_window = seconds(POSTING_WINDOW_SECS, s)?;
        }
        if let Some(s) = env.parse::<u64>(LOCK_LEASE_SECS)? {
            let lease = seconds(LOCK_LEASE_SECS, s)?;
            config.ledger.lock_duration = lease;
            config.engine.posting_lock_duration = lease;
        }
        if let Some(s) = env.parse::<u64>(LOCK_SWEEP_SECS)? {
            config.locks.sweep_interval = seconds(LOCK_SWEEP_SECS, s)?;
        }
        if let Some(s) = env.parse::<u64>(EXPIRY_INITIAL_DELAY_SECS)? {
            config.expiry.initial_delay = bounded(EXPIRY_INITIAL_DELAY_SECS, s, Duration::from_secs(s))?;
        }
        if let Some(s) = env.parse::<u64>(EXPIRY_INTERVAL_SECS)? {
            config.expiry.interval = seconds(EXPIRY_INTERVAL_SECS, s)?;
        }
        if let Some(format) = env.parse::<LogFormat>(LOG_FORMAT)? {
            config.logging.format = format;
        }

        if config.ledger.default_duration > config.ledger.max_duration {
            return Err(ConfigError::Invalid {
                key: RESERVATION_DEFAULT_MINUTES,
                value: (config.ledger.default_duration.as_secs() / 60).to_string(),
                reason: format!(
                    "exceeds the maximum of {} minutes",
                    config.ledger.max_duration.as_secs() / 60
                ),
            });
        }
        Ok(config)
    }
}

/// Load configuration from the environment and install the log subscriber.
///
/// Entry point for binaries embedding the subsystem.
pub fn bootstrap() -> anyhow::Result<InventoryConfig> {
    let config = InventoryConfig::from_env().context("loading FORGEERP_* configuration")?;
    forgeerp_observability::init_with(&config.logging);
    tracing::info!(
        reservation_minutes = config.ledger.default_duration.as_secs() / 60,
        max_renewals = config.ledger.max_renewals,
        expiry_interval_secs = config.expiry.interval.as_secs(),
        "configuration loaded"
    );
    Ok(config)
}

struct Lookup<'a, F>(&'a F);

impl<F> Lookup<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(raw) = (self.0)(key) else {
            return Ok(None);
        };
        raw.trim().parse::<T>().map(Some).map_err(|e| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })
    }
}

fn minutes(key: &'static str, m: u64) -> Result<Duration, ConfigError> {
    positive(key, m)?;
    whole_minutes(key, m)
}

fn seconds(key: &'static str, s: u64) -> Result<Duration, ConfigError> {
    positive(key, s)?;
    bounded(key, s, Duration::from_secs(s))
}

fn whole_minutes(key: &'static str, m: u64) -> Result<Duration, ConfigError> {
    let secs = m.checked_mul(60).ok_or_else(|| invalid(key, m, "too large"))?;
    bounded(key, m, Duration::from_secs(secs))
}

fn positive(key: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(invalid(key, value, "must be positive"));
    }
    Ok(())
}

/// Durations are added to timestamps, so they must fit a `chrono::Duration`
/// and stay within `MAX_DURATION`.
fn bounded(key: &'static str, value: u64, duration: Duration) -> Result<Duration, ConfigError> {
    if duration > MAX_DURATION || chrono::Duration::from_std(duration).is_err() {
        return Err(invalid(key, value, "too large"));
    }
    Ok(duration)
}

fn invalid(key: &'static str, value: u64, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(vars: &[(&str, &str)]) -> Result<InventoryConfig, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        InventoryConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_overrides() {
        let config = from(&[]).unwrap();
        assert_eq!(config.ledger.default_duration, Duration::from_secs(30 * 60));
        assert_eq!(config.ledger.max_duration, Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.ledger.max_renewals, 10);
        assert_eq!(config.ledger.lock_duration, Duration::from_secs(30));
        assert_eq!(config.locks.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.expiry.initial_delay, Duration::from_secs(30));
        assert_eq!(config.expiry.interval, Duration::from_secs(60));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn overrides_apply() {
        let config = from(&[
            (RESERVATION_DEFAULT_MINUTES, "15"),
            (RESERVATION_MAX_RENEWALS, "3"),
            (LOCK_LEASE_SECS, "5"),
            (POSTING_WINDOW_SECS, "90"),
            (EXPIRY_INITIAL_DELAY_SECS, "0"),
            (LOG_FORMAT, "pretty"),
        ])
        .unwrap();
        assert_eq!(config.ledger.default_duration, Duration::from_secs(15 * 60));
        assert_eq!(config.ledger.max_renewals, 3);
        assert_eq!(config.ledger.lock_duration, Duration::from_secs(5));
        assert_eq!(config.engine.posting_lock_duration, Duration::from_secs(5));
        assert_eq!(config.ledger.posting_window, Duration::from_secs(90));
        assert_eq!(config.expiry.initial_delay, Duration::ZERO);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn rejects_bad_values() {
        let err = from(&[(RESERVATION_MAX_RENEWALS, "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == RESERVATION_MAX_RENEWALS));

        assert!(from(&[(EXPIRY_INTERVAL_SECS, "0")]).is_err());
        assert!(from(&[(RESERVATION_DEFAULT_MINUTES, "120"), (RESERVATION_MAX_MINUTES, "60")]).is_err());

        let huge = u64::MAX.to_string();
        for key in [
            RESERVATION_MAX_MINUTES,
            RENEWAL_CEILING_STEP_MINUTES,
            LOCK_LEASE_SECS,
            EXPIRY_INITIAL_DELAY_SECS,
        ] {
            let err = from(&[(key, huge.as_str())]).unwrap_err();
            assert!(
                matches!(&err, ConfigError::Invalid { key: k, reason, .. } if *k == key && reason == "too large"),
                "{err}"
            );
        }
        // Fits a u64 of seconds but not a timestamp offset.
        assert!(from(&[(RESERVATION_MAX_MINUTES, "9000000000000000")]).is_err());
    }

    #[test]
    fn ceiling_step_may_be_zero() {
        let config = from(&[(RENEWAL_CEILING_STEP_MINUTES, "0")]).unwrap();
        assert_eq!(config.ledger.renewal_ceiling_step, Duration::ZERO);
    }
}
