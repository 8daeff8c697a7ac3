use std::str::FromStr;
use std::time::Duration;

use crate::errors::AppError;
use crate::services::insight::INSIGHT_API_URL;

const DEFAULT_API_KEY: &str = "DEMO_KEY";
const DEFAULT_PORT: u16 = 8080;
/// The feed is refreshed hourly at most.
const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 3600;
const DEFAULT_HISTORY_DEPTH: usize = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Application configuration, parsed from environment variables.
#[derive(Clone)]
pub struct AppConfig {
    pub insight_api_url: String,
    pub nasa_api_key: String,
    pub port: u16,
    pub cache_ttl: Duration,
    pub poll_interval: Duration,
    /// Number of sols the rolling history retains.
    pub history_depth: usize,
    pub request_timeout: Duration,
}

// Hand-written so the API key never ends up in logs
impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("insight_api_url", &self.insight_api_url)
            .field("nasa_api_key", &"<redacted>")
            .field("port", &self.port)
            .field("cache_ttl", &self.cache_ttl)
            .field("poll_interval", &self.poll_interval)
            .field("history_depth", &self.history_depth)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Unset or empty variables take
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            insight_api_url: var("INSIGHT_API_URL").unwrap_or_else(|| INSIGHT_API_URL.to_string()),
            nasa_api_key: var("NASA_API_KEY").unwrap_or_else(|| DEFAULT_API_KEY.to_string()),
            port: parse_positive("PORT", var("PORT"), DEFAULT_PORT)?,
            cache_ttl: Duration::from_secs(parse_positive(
                "CACHE_TTL_SECS",
                var("CACHE_TTL_SECS"),
                DEFAULT_CACHE_TTL_SECS,
            )?),
            poll_interval: Duration::from_secs(parse_positive(
                "POLL_INTERVAL_SECS",
                var("POLL_INTERVAL_SECS"),
                DEFAULT_POLL_INTERVAL_SECS,
            )?),
            history_depth: parse_positive(
                "HISTORY_DEPTH",
                var("HISTORY_DEPTH"),
                DEFAULT_HISTORY_DEPTH,
            )?,
            request_timeout: Duration::from_secs(parse_positive(
                "REQUEST_TIMEOUT_SECS",
                var("REQUEST_TIMEOUT_SECS"),
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
        })
    }
}

/// Parse a non-zero number, falling back to `default` when unset.
fn parse_positive<T>(key: &str, value: Option<String>, default: T) -> Result<T, AppError>
where
    T: FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    let Some(raw) = value else {
        return Ok(default);
    };
    let parsed: T = raw
        .trim()
        .parse()
        .map_err(|e| AppError::Config(format!("{} must be a positive number: {}", key, e)))?;
    if parsed == T::default() {
        return Err(AppError::Config(format!("{} must be greater than zero", key)));
    }
    Ok(parsed)
}
