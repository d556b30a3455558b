//! Typed service configuration read from the environment.

use std::{env, str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow};
use chrono::TimeDelta;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub payment: PaymentConfig,
    pub sweep: SweepConfig,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Applied with `SET LOCAL lock_timeout` in every inventory transaction.
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub success_code: String,
    /// Result codes meaning the customer abandoned the payment.
    pub cancel_codes: Vec<String>,
    pub providers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval: Duration,
    pub pending_timeout: TimeDelta,
    pub delivered_after: TimeDelta,
    pub batch_size: i64,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Exponential backoff: base, 2×base, 4×base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            success_code: "00".into(),
            cancel_codes: vec!["24".into()],
            providers: vec!["qr_payment".into(), "vnpay".into()],
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            pending_timeout: TimeDelta::minutes(15),
            delivered_after: TimeDelta::days(7),
            batch_size: 100,
        }
    }
}

/// Loads configuration from the process environment (after `.env` has been applied).
pub fn load() -> Result<AppConfig> {
    load_from(|key| env::var(key).ok())
}

pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<AppConfig> {
    let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    let database_url = get("DATABASE_URL").ok_or_else(|| anyhow!("DATABASE_URL must be set"))?;

    let server = ServerConfig {
        host: get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
        port: parse_or(get("SERVER_PORT"), "SERVER_PORT", 3000)?,
    };

    let database = DatabaseConfig {
        url: database_url,
        max_connections: parse_or(get("DATABASE_MAX_CONNECTIONS"), "DATABASE_MAX_CONNECTIONS", 10)?,
        lock_timeout_ms: parse_or(get("DATABASE_LOCK_TIMEOUT_MS"), "DATABASE_LOCK_TIMEOUT_MS", 2000)?,
    };

    let payment_defaults = PaymentConfig::default();
    let payment = PaymentConfig {
        success_code: get("PAYMENT_SUCCESS_CODE").unwrap_or(payment_defaults.success_code),
        cancel_codes: get("PAYMENT_CANCEL_CODES")
            .map(|codes| split_list(&codes))
            .unwrap_or(payment_defaults.cancel_codes),
        providers: get("PAYMENT_PROVIDERS")
            .map(|providers| split_list(&providers))
            .unwrap_or(payment_defaults.providers),
    };

    let sweep = SweepConfig {
        interval: Duration::from_secs(parse_or(get("SWEEP_INTERVAL_SECS"), "SWEEP_INTERVAL_SECS", 60)?),
        pending_timeout: seconds(parse_or(
            get("SWEEP_PENDING_TIMEOUT_SECS"),
            "SWEEP_PENDING_TIMEOUT_SECS",
            15 * 60,
        )?)
        .context("SWEEP_PENDING_TIMEOUT_SECS is out of range")?,
        delivered_after: seconds(parse_or(
            get("SWEEP_DELIVERED_AFTER_SECS"),
            "SWEEP_DELIVERED_AFTER_SECS",
            7 * 24 * 60 * 60,
        )?)
        .context("SWEEP_DELIVERED_AFTER_SECS is out of range")?,
        batch_size: parse_or(get("SWEEP_BATCH_SIZE"), "SWEEP_BATCH_SIZE", 100)?,
    };

    let retry = RetryPolicy {
        max_attempts: parse_or(get("RETRY_MAX_ATTEMPTS"), "RETRY_MAX_ATTEMPTS", 3)?,
        base_delay: Duration::from_millis(parse_or(get("RETRY_BASE_DELAY_MS"), "RETRY_BASE_DELAY_MS", 50)?),
    };
    if retry.max_attempts == 0 {
        return Err(anyhow!("RETRY_MAX_ATTEMPTS must be at least 1"));
    }

    Ok(AppConfig {
        server,
        database,
        payment,
        sweep,
        retry,
    })
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value '{raw}' for {key}")),
        None => Ok(default),
    }
}

fn seconds(secs: i64) -> Option<TimeDelta> {
    TimeDelta::try_seconds(secs)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = load_from(lookup(&[("DATABASE_URL", "postgres://localhost/keebshop")])).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.payment.success_code, "00");
        assert_eq!(config.payment.cancel_codes, vec!["24".to_string()]);
        assert_eq!(config.sweep.pending_timeout, TimeDelta::minutes(15));
        assert_eq!(config.sweep.delivered_after, TimeDelta::days(7));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn missing_database_url_fails() {
        assert!(load_from(lookup(&[])).is_err());
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let err = load_from(lookup(&[
            ("DATABASE_URL", "postgres://localhost/keebshop"),
            ("SERVER_PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("SERVER_PORT"));
    }

    #[test]
    fn lists_are_trimmed() {
        let config = load_from(lookup(&[
            ("DATABASE_URL", "postgres://localhost/keebshop"),
            ("PAYMENT_CANCEL_CODES", " 24, 11 ,,"),
        ]))
        .unwrap();
        assert_eq!(config.payment.cancel_codes, vec!["24", "11"]);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(10),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3), Duration::from_millis(40));
    }
}
