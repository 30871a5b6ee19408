use std::env;
use std::time::Duration;

use crate::error::DispatchError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub trip_queue_size: usize,
    pub event_buffer_size: usize,
    /// How long a driver may sit on an offer before it moves on.
    pub offer_timeout: Duration,
    /// Nearest-K candidates considered per dispatch attempt.
    pub dispatch_candidates: usize,
    pub max_search_radius_km: f64,
    /// Pings older than this exclude a driver from matching.
    pub freshness_threshold: Duration,
    pub base_rate_per_km: f64,
    pub commission_percent: f64,
}

impl Config {
    pub fn from_env() -> Result<Self, DispatchError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            trip_queue_size: parse_or_default("TRIP_QUEUE_SIZE", 1024)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            offer_timeout: Duration::from_secs(parse_or_default("OFFER_TIMEOUT_SECS", 15)?),
            dispatch_candidates: parse_or_default("DISPATCH_CANDIDATES", 5)?,
            max_search_radius_km: parse_or_default("MAX_SEARCH_RADIUS_KM", 5.0)?,
            freshness_threshold: Duration::from_secs(parse_or_default(
                "FRESHNESS_THRESHOLD_SECS",
                300,
            )?),
            base_rate_per_km: parse_or_default("BASE_RATE_PER_KM", 2.0)?,
            commission_percent: parse_or_default("COMMISSION_PERCENT", 12.0)?,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, DispatchError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| DispatchError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
