//! Environment-style configuration for the crawl policy layer.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use crate::error::AppError;

/// Statuses retried by default.
pub const DEFAULT_RETRY_STATUSES: [u16; 8] = [408, 429, 500, 502, 503, 504, 522, 524];

/// Ban detection settings.
#[derive(Debug, Clone)]
pub struct BanConfig {
    /// Consecutive 403/429 responses on one slot before dispatch is paused.
    pub threshold: u32,
    /// How long dispatch stays suspended.
    pub cooldown: Duration,
}

impl Default for BanConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Retry settings.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts per logical request, first dispatch included.
    pub max_attempts: u32,
    /// Statuses considered transient.
    pub retry_statuses: BTreeSet<u16>,
    pub backoff_base: f64,
    pub backoff_max: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_statuses: DEFAULT_RETRY_STATUSES.into_iter().collect(),
            backoff_base: 2.0,
            backoff_max: Duration::from_secs(30),
        }
    }
}

/// Adaptive per-slot delay settings (auto-throttle).
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Base delay between requests to one slot; also the lower bound.
    pub download_delay: Duration,
    pub start_delay: Duration,
    pub max_delay: Duration,
    /// Average number of requests the governor aims to keep in flight per slot.
    pub target_concurrency: f64,
    /// Hard cap on simultaneous requests per slot, enforced by the host.
    pub concurrent_per_slot: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            download_delay: Duration::from_secs(1),
            start_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            target_concurrency: 2.0,
            concurrent_per_slot: 4,
        }
    }
}

/// Full crawl policy configuration.
#[derive(Debug, Clone, Default)]
pub struct CrawlConfig {
    pub ban: BanConfig,
    pub retry: RetryConfig,
    pub throttle: ThrottleConfig,
    pub proxies: Vec<String>,
    /// Empty means the built-in identity list.
    pub user_agents: Vec<String>,
}

impl CrawlConfig {
    /// Read configuration from the process environment.
    ///
    /// - `BAN_THRESHOLD`, `BAN_SLEEP_SECONDS`
    /// - `RETRY_TIMES`, `RETRY_HTTP_CODES`, `RETRY_BACKOFF_BASE`, `RETRY_BACKOFF_MAX`
    /// - `PROXY_LIST` (comma-separated), `PROXY_LIST_FILE` (one per line)
    /// - `USER_AGENT_LIST` (newline-separated)
    /// - `CONCURRENT_REQUESTS_PER_DOMAIN`, `DOWNLOAD_DELAY`,
    ///   `AUTOTHROTTLE_START_DELAY`, `AUTOTHROTTLE_MAX_DELAY`,
    ///   `AUTOTHROTTLE_TARGET_CONCURRENCY`
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = CrawlConfig::default();

        let ban = BanConfig {
            threshold: parse_or(&get, "BAN_THRESHOLD", defaults.ban.threshold)?,
            cooldown: Duration::from_secs(parse_or(&get, "BAN_SLEEP_SECONDS", 60u64)?),
        };
        if ban.threshold == 0 {
            return Err(AppError::ConfigError(
                "BAN_THRESHOLD must be at least 1".into(),
            ));
        }

        let retry_statuses = match get("RETRY_HTTP_CODES") {
            None => defaults.retry.retry_statuses,
            Some(raw) => parse_status_list(&raw)?,
        };
        let retry = RetryConfig {
            max_attempts: parse_or(&get, "RETRY_TIMES", defaults.retry.max_attempts)?,
            retry_statuses,
            backoff_base: parse_or(&get, "RETRY_BACKOFF_BASE", defaults.retry.backoff_base)?,
            backoff_max: secs(parse_or(&get, "RETRY_BACKOFF_MAX", 30.0)?, "RETRY_BACKOFF_MAX")?,
        };
        if !(retry.backoff_base.is_finite() && retry.backoff_base >= 1.0) {
            return Err(AppError::ConfigError(
                "RETRY_BACKOFF_BASE must be >= 1.0".into(),
            ));
        }

        let throttle = ThrottleConfig {
            download_delay: secs(parse_or(&get, "DOWNLOAD_DELAY", 1.0)?, "DOWNLOAD_DELAY")?,
            start_delay: secs(
                parse_or(&get, "AUTOTHROTTLE_START_DELAY", 1.0)?,
                "AUTOTHROTTLE_START_DELAY",
            )?,
            max_delay: secs(
                parse_or(&get, "AUTOTHROTTLE_MAX_DELAY", 10.0)?,
                "AUTOTHROTTLE_MAX_DELAY",
            )?,
            target_concurrency: parse_or(
                &get,
                "AUTOTHROTTLE_TARGET_CONCURRENCY",
                defaults.throttle.target_concurrency,
            )?,
            concurrent_per_slot: parse_or(
                &get,
                "CONCURRENT_REQUESTS_PER_DOMAIN",
                defaults.throttle.concurrent_per_slot,
            )?,
        };
        if !(throttle.target_concurrency.is_finite() && throttle.target_concurrency > 0.0) {
            return Err(AppError::ConfigError(
                "AUTOTHROTTLE_TARGET_CONCURRENCY must be positive".into(),
            ));
        }
        if throttle.concurrent_per_slot == 0 {
            return Err(AppError::ConfigError(
                "CONCURRENT_REQUESTS_PER_DOMAIN must be at least 1".into(),
            ));
        }

        let mut proxies: Vec<String> = get("PROXY_LIST")
            .map(|raw| split_trimmed(&raw, ','))
            .unwrap_or_default();
        if let Some(path) = get("PROXY_LIST_FILE") {
            proxies.extend(load_proxy_file(Path::new(path.trim())));
        }

        let user_agents = get("USER_AGENT_LIST")
            .map(|raw| split_trimmed(&raw, '\n'))
            .unwrap_or_default();

        Ok(Self {
            ban,
            retry,
            throttle,
            proxies,
            user_agents,
        })
    }
}

/// Read a proxy list file, one entry per line. A missing or unreadable file
/// only logs a warning so the crawl can still run proxyless.
pub fn load_proxy_file(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => split_trimmed(&contents, '\n'),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Proxy list file not readable");
            Vec::new()
        }
    }
}

fn split_trimmed(raw: &str, sep: char) -> Vec<String> {
    raw.split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(format!("Invalid {key} '{raw}'"))
        }),
    }
}

fn secs(value: f64, key: &str) -> Result<Duration, AppError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| AppError::ConfigError(format!("{key} must be a non-negative number")))
}

fn parse_status_list(raw: &str) -> Result<BTreeSet<u16>, AppError> {
    split_trimmed(raw, ',')
        .iter()
        .map(|code| match code.parse::<u16>() {
            Ok(status) if (100..600).contains(&status) => Ok(status),
            _ => Err(AppError::ConfigError(format!(
                "Invalid RETRY_HTTP_CODES entry '{code}'"
            ))),
        })
        .collect()
}
