//! Process configuration, read from environment variables.
//!
//! `main` loads an optional `.env` file through `dotenv` before calling
//! [`AppConfig::from_env`]; tests build configs directly from
//! [`AppConfig::default`].

use crate::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;
use validator::{Validate, ValidationError};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const SECS_PER_HOUR: u64 = 3600;

/// Runtime settings for the analysis brain.
#[derive(Debug, Clone, Validate)]
pub struct AppConfig {
    /// Maximum entries kept in the per-comment result cache.
    #[validate(range(min = 1))]
    pub cache_max_size: usize,
    /// Lifetime of a per-comment result.
    #[validate(custom(function = "non_zero_duration"))]
    pub cache_ttl: Duration,
    /// Maximum entries kept in the whole-batch cache.
    #[validate(range(min = 1))]
    pub batch_cache_max_size: usize,
    /// Lifetime of a whole-batch report.
    #[validate(custom(function = "non_zero_duration"))]
    pub batch_cache_ttl: Duration,
    /// Total attempts per external call (first try included).
    #[validate(range(min = 1, max = 10))]
    pub max_retries: u32,
    /// Per-attempt timeout for external calls.
    #[validate(custom(function = "non_zero_duration"))]
    pub request_timeout: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_jitter: bool,
    /// Turns kept per chat session before the oldest are dropped. Even, so
    /// that whole user/assistant exchanges are kept.
    #[validate(range(min = 2), custom(function = "even_turns"))]
    pub max_history_turns: usize,
    #[validate(range(min = 1))]
    pub max_input_chars: usize,
    #[validate(range(min = 1))]
    pub max_chat_chars: usize,
    /// Comments analyzed concurrently within one batch. 1 means sequential.
    #[validate(range(min = 1, max = 64))]
    pub batch_concurrency: usize,
    /// Client-side cap on external calls per `rate_limit_window`. 0 disables throttling.
    pub requests_per_minute: u32,
    /// Sliding window of the client-side throttle, one minute by default.
    #[validate(custom(function = "non_zero_duration"))]
    pub rate_limit_window: Duration,
    /// Credential for the generative-language service.
    pub api_key: Option<String>,
    #[validate(length(min = 1))]
    pub model: String,
    pub base_url: String,
}

fn non_zero_duration(value: &Duration) -> Result<(), ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::new("zero_duration"));
    }
    Ok(())
}

fn even_turns(value: usize) -> Result<(), ValidationError> {
    if value % 2 != 0 {
        return Err(ValidationError::new("odd_history_turns"));
    }
    Ok(())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_max_size: 1000,
            cache_ttl: Duration::from_secs(24 * SECS_PER_HOUR),
            batch_cache_max_size: 100,
            batch_cache_ttl: Duration::from_secs(48 * SECS_PER_HOUR),
            max_retries: 3,
            request_timeout: Duration::from_secs(30),
            retry_base_delay: Duration::from_millis(1000),
            retry_max_delay: Duration::from_millis(60_000),
            retry_jitter: true,
            max_history_turns: 20,
            max_input_chars: 10_000,
            max_chat_chars: 5_000,
            batch_concurrency: 1,
            requests_per_minute: 60,
            rate_limit_window: Duration::from_secs(60),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl AppConfig {
    /// Builds the configuration from environment variables, falling back to
    /// defaults for unset ones. A set-but-unparseable value is an error.
    ///
    /// A missing `GEMINI_API_KEY` is not an error here; it is reported by the
    /// health check and on the first call attempt.
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let config = Self {
            cache_max_size: parse_var("CACHE_MAX_SIZE", defaults.cache_max_size)?,
            cache_ttl: hours_var("CACHE_TTL_HOURS", defaults.cache_ttl)?,
            batch_cache_max_size: parse_var("BATCH_CACHE_MAX_SIZE", defaults.batch_cache_max_size)?,
            batch_cache_ttl: hours_var("BATCH_CACHE_TTL_HOURS", defaults.batch_cache_ttl)?,
            max_retries: parse_var("MAX_RETRIES", defaults.max_retries)?,
            request_timeout: Duration::from_secs(parse_var(
                "REQUEST_TIMEOUT",
                defaults.request_timeout.as_secs(),
            )?),
            retry_base_delay: Duration::from_millis(parse_var(
                "RETRY_BASE_DELAY_MS",
                defaults.retry_base_delay.as_millis() as u64,
            )?),
            retry_max_delay: Duration::from_millis(parse_var(
                "RETRY_MAX_DELAY_MS",
                defaults.retry_max_delay.as_millis() as u64,
            )?),
            retry_jitter: parse_var("RETRY_JITTER", defaults.retry_jitter)?,
            max_history_turns: parse_var("MAX_HISTORY_TURNS", defaults.max_history_turns)?,
            max_input_chars: parse_var("MAX_INPUT_CHARS", defaults.max_input_chars)?,
            max_chat_chars: parse_var("MAX_CHAT_CHARS", defaults.max_chat_chars)?,
            batch_concurrency: parse_var("BATCH_CONCURRENCY", defaults.batch_concurrency)?,
            requests_per_minute: parse_var("REQUESTS_PER_MINUTE", defaults.requests_per_minute)?,
            rate_limit_window: Duration::from_secs(parse_var(
                "RATE_LIMIT_WINDOW_SECS",
                defaults.rate_limit_window.as_secs(),
            )?),
            api_key: env::var("GEMINI_API_KEY")
                .ok()
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
            model: env::var("GEMINI_MODEL").unwrap_or(defaults.model),
            base_url: env::var("GEMINI_BASE_URL").unwrap_or(defaults.base_url),
        };

        // Reject garbage early rather than at the first HTTP call.
        Url::parse(&config.base_url)?;
        config.validate()?;
        Ok(config)
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| AppError::Config(format!("{} has invalid value '{}': {}", name, raw, e))),
        Err(_) => Ok(default),
    }
}

fn hours_var(name: &str, default: Duration) -> Result<Duration, AppError> {
    let hours: u64 = parse_var(name, default.as_secs() / SECS_PER_HOUR)?;
    hours
        .checked_mul(SECS_PER_HOUR)
        .map(Duration::from_secs)
        .ok_or_else(|| AppError::Config(format!("{} is too large: {} hours", name, hours)))
}
