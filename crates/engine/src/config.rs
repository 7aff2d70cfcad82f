//! Engine configuration.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `CARTSYNC_API_URL` - Commerce API origin (default: `http://localhost:5000/api`)
//!
//! The API origin is the only environment-driven setting. Tax rate, request
//! timeout and product cache tuning are set programmatically with the
//! `with_*` builder methods.

use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;
use url::Url;

use crate::summary::DEFAULT_TAX_RATE;

/// Environment variable holding the commerce API origin.
pub const API_URL_ENV: &str = "CARTSYNC_API_URL";

/// API origin used when `CARTSYNC_API_URL` is unset.
pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PRODUCT_CACHE_TTL: Duration = Duration::from_secs(300);
const DEFAULT_PRODUCT_CACHE_CAPACITY: u64 = 1000;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Invalid API base URL {0}: {1}")]
    InvalidBaseUrl(String, String),
    #[error("Tax rate must be between 0 and 1 (got {0})")]
    InvalidTaxRate(Decimal),
}

/// Cart engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Commerce API origin. Always ends with a `/` so endpoints join under it.
    pub api_base_url: Url,
    /// Tax rate applied by the summary aggregator (0.10 = 10%).
    pub tax_rate: Decimal,
    /// Per-request timeout for the HTTP client.
    pub request_timeout: Duration,
    /// How long product look-ups stay cached.
    pub product_cache_ttl: Duration,
    /// Maximum number of cached product look-ups.
    pub product_cache_capacity: u64,
}

impl EngineConfig {
    /// Create a configuration for the given API origin with default settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidBaseUrl` if the URL does not parse or
    /// cannot carry path segments.
    pub fn new(api_base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            api_base_url: parse_base_url(api_base_url)?,
            tax_rate: DEFAULT_TAX_RATE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            product_cache_ttl: DEFAULT_PRODUCT_CACHE_TTL,
            product_cache_capacity: DEFAULT_PRODUCT_CACHE_CAPACITY,
        })
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if `CARTSYNC_API_URL` is set to
    /// something that is not a usable base URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api_url = get_env_or_default(API_URL_ENV, DEFAULT_API_URL);
        Self::new(&api_url).map_err(|e| ConfigError::InvalidEnvVar(API_URL_ENV.to_string(), e.to_string()))
    }

    /// Override the tax rate used for cart summaries.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidTaxRate` if the rate is outside `0..=1`.
    pub fn with_tax_rate(mut self, tax_rate: Decimal) -> Result<Self, ConfigError> {
        if tax_rate.is_sign_negative() || tax_rate > Decimal::ONE {
            return Err(ConfigError::InvalidTaxRate(tax_rate));
        }
        self.tax_rate = tax_rate;
        Ok(self)
    }

    /// Override the HTTP request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override product cache TTL and capacity.
    #[must_use]
    pub const fn with_product_cache(mut self, ttl: Duration, capacity: u64) -> Self {
        self.product_cache_ttl = ttl;
        self.product_cache_capacity = capacity;
        self
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an API origin, normalizing it to end with a trailing slash.
fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| ConfigError::InvalidBaseUrl(raw.to_string(), e.to_string()))?;

    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidBaseUrl(
            raw.to_string(),
            "must be an http(s) URL".to_string(),
        ));
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let config = EngineConfig::new("https://shop.example.com/api").unwrap();
        assert_eq!(config.api_base_url.as_str(), "https://shop.example.com/api/");
    }

    #[test]
    fn test_base_url_rejects_non_http() {
        let result = EngineConfig::new("mailto:someone@example.com");
        assert!(matches!(result, Err(ConfigError::InvalidBaseUrl(_, _))));
    }

    #[test]
    fn test_base_url_rejects_garbage() {
        assert!(EngineConfig::new("not a url").is_err());
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::new(DEFAULT_API_URL).unwrap();
        assert_eq!(config.tax_rate, Decimal::new(10, 2));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.product_cache_capacity, 1000);
    }

    #[test]
    fn test_tax_rate_bounds() {
        let config = EngineConfig::new(DEFAULT_API_URL).unwrap();
        assert!(config.clone().with_tax_rate(Decimal::new(-1, 2)).is_err());
        assert!(config.clone().with_tax_rate(Decimal::new(2, 0)).is_err());
        let config = config.with_tax_rate(Decimal::new(8, 2)).unwrap();
        assert_eq!(config.tax_rate, Decimal::new(8, 2));
    }
}
