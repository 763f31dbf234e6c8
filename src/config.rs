use std::str::FromStr;
use std::time::Duration;

use crate::exchange::retry::RetryConfig;
use crate::exchange::TransportConfig;
use crate::funding::TrackerConfig;
use crate::scheduler::SchedulerConfig;

#[derive(Clone, Debug)]
pub struct Config {
    pub exchange: String,
    pub bitget_base: String,
    pub binance_fapi_base: String,
    pub http_proxy_url: Option<String>,
    pub http_timeout_secs: u64,
    /// Shared limiter for every exchange call.
    pub exchange_rate_per_sec: f64,
    pub exchange_burst: f64,
    pub retry_max_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    /// Fraction of each backoff delay to randomize; 0 disables jitter.
    pub retry_jitter: f64,
    pub sqlite_path: String,
    pub history_cap: usize,
    /// Funding rate (percent) at or below which a record is a key moment.
    pub key_moment_threshold_pct: f64,
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub batch_pause_secs: u64,
    pub symbols: Option<Vec<String>>,
    pub tick_delay_secs: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            exchange: std::env::var("EXCHANGE").unwrap_or_else(|_| "bitget".to_string()),
            bitget_base: std::env::var("BITGET_BASE").unwrap_or_else(|_| "https://api.bitget.com".to_string()),
            binance_fapi_base: std::env::var("BINANCE_FAPI_BASE")
                .unwrap_or_else(|_| "https://fapi.binance.com".to_string()),
            http_proxy_url: std::env::var("HTTP_PROXY_URL").ok().filter(|v| !v.is_empty()),
            http_timeout_secs: env_or("HTTP_TIMEOUT_SECS", 10),
            exchange_rate_per_sec: env_or("EXCHANGE_RATE_PER_SEC", 10.0),
            exchange_burst: env_or("EXCHANGE_BURST", 10.0),
            retry_max_attempts: env_or("RETRY_MAX_ATTEMPTS", 3),
            retry_base_ms: env_or("RETRY_BASE_MS", 4_000),
            retry_max_ms: env_or("RETRY_MAX_MS", 10_000),
            retry_jitter: env_or("RETRY_JITTER", 0.0_f64).clamp(0.0, 1.0),
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or_else(|_| "fundingwatch.db".to_string()),
            history_cap: env_or("HISTORY_CAP", 500),
            key_moment_threshold_pct: env_or("KEY_MOMENT_THRESHOLD_PCT", -0.5),
            batch_size: env_or("BATCH_SIZE", 40),
            max_concurrency: env_or("MAX_CONCURRENCY", 5),
            batch_pause_secs: env_or("BATCH_PAUSE_SECS", 60),
            symbols: std::env::var("SYMBOLS").ok().map(|v| parse_symbols(&v)).filter(|s| !s.is_empty()),
            tick_delay_secs: env_or("TICK_DELAY_SECS", 60),
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            proxy_url: self.http_proxy_url.clone(),
            retry: RetryConfig {
                max_attempts: self.retry_max_attempts,
                base_delay_ms: self.retry_base_ms,
                max_delay_ms: self.retry_max_ms,
                jitter_factor: self.retry_jitter,
            },
        }
    }

    pub fn tracker(&self) -> TrackerConfig {
        TrackerConfig {
            key_moment_threshold_pct: self.key_moment_threshold_pct,
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            batch_size: self.batch_size.max(1),
            max_concurrency: self.max_concurrency.max(1),
            batch_pause: Duration::from_secs(self.batch_pause_secs),
        }
    }
}

fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}
