use std::env;

use crate::engine::pricing::PricingConfig;
use crate::error::AppError;
use crate::models::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Throttle applied to `submit`, keyed by requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitLimit {
    pub interval_ms: u64,
    pub max: u64,
}

impl Default for SubmitLimit {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            max: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
    pub submit_limit: SubmitLimit,
    pub rate_limit_max_keys: usize,
    pub rate_limit_sweep_secs: u64,
    pub pricing: PricingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            event_buffer_size: 1024,
            submit_limit: SubmitLimit::default(),
            rate_limit_max_keys: 10_000,
            rate_limit_sweep_secs: 60,
            pricing: PricingConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Config::default();
        let pricing = defaults.pricing.clone();

        let log_format = match env::var("LOG_FORMAT") {
            Ok(raw) => parse_log_format(&raw)?,
            Err(_) => defaults.log_format,
        };

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            submit_limit: SubmitLimit {
                interval_ms: parse_or_default(
                    "SUBMIT_RATE_INTERVAL_MS",
                    defaults.submit_limit.interval_ms,
                )?,
                max: parse_or_default("SUBMIT_RATE_MAX", defaults.submit_limit.max)?,
            },
            rate_limit_max_keys: parse_or_default(
                "RATE_LIMIT_MAX_KEYS",
                defaults.rate_limit_max_keys,
            )?,
            rate_limit_sweep_secs: parse_or_default(
                "RATE_LIMIT_SWEEP_SECS",
                defaults.rate_limit_sweep_secs,
            )?,
            pricing: PricingConfig {
                base_fee: cents_or_default("PRICING_BASE_FEE_CENTS", pricing.base_fee)?,
                per_mile: cents_or_default("PRICING_PER_MILE_CENTS", pricing.per_mile)?,
                fragile_surcharge: cents_or_default(
                    "PRICING_FRAGILE_SURCHARGE_CENTS",
                    pricing.fragile_surcharge,
                )?,
                concierge_surcharge: cents_or_default(
                    "PRICING_CONCIERGE_SURCHARGE_CENTS",
                    pricing.concierge_surcharge,
                )?,
                service_fee: cents_or_default("PRICING_SERVICE_FEE_CENTS", pricing.service_fee)?,
                driver_payout_percent: parse_or_default(
                    "PRICING_DRIVER_PAYOUT_PERCENT",
                    pricing.driver_payout_percent,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.submit_limit.max == 0 {
            return Err(AppError::InvalidConfig("SUBMIT_RATE_MAX must be > 0".to_string()));
        }
        if self.submit_limit.interval_ms == 0 {
            return Err(AppError::InvalidConfig(
                "SUBMIT_RATE_INTERVAL_MS must be > 0".to_string(),
            ));
        }
        if self.event_buffer_size == 0 {
            return Err(AppError::InvalidConfig("EVENT_BUFFER_SIZE must be > 0".to_string()));
        }
        if self.pricing.driver_payout_percent > 100 {
            return Err(AppError::InvalidConfig(
                "PRICING_DRIVER_PAYOUT_PERCENT must be <= 100".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_log_format(raw: &str) -> Result<LogFormat, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "compact" => Ok(LogFormat::Compact),
        "json" => Ok(LogFormat::Json),
        other => Err(AppError::InvalidConfig(format!(
            "invalid LOG_FORMAT: {other}, expected compact or json"
        ))),
    }
}

fn cents_or_default(key: &str, default: Money) -> Result<Money, AppError> {
    let cents: u32 = parse_or_default(key, default.cents().max(0) as u32)?;
    Ok(Money::from_cents(i64::from(cents)))
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::InvalidConfig(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
