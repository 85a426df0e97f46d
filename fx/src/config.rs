//! Rate cache and provider configuration.

use chrono::Duration;
use fxwallet_common::constants;

/// Configuration for the rate cache.
#[derive(Debug, Clone)]
pub struct RateCacheConfig {
    /// Age below which a cached pair rate is served without a provider call.
    pub soft_ttl: Duration,
    /// Age at which a cached pair rate is treated as absent.
    pub hard_ttl: Duration,
    /// Lifetime of a cached market rate table.
    pub market_ttl: Duration,
    /// Maximum number of entries in the in-memory store.
    pub max_entries: usize,
}

impl Default for RateCacheConfig {
    fn default() -> Self {
        Self {
            soft_ttl: constants::rate_soft_ttl(),
            hard_ttl: constants::rate_hard_ttl(),
            market_ttl: constants::market_rates_ttl(),
            max_entries: 10000,
        }
    }
}

impl RateCacheConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = env_i64("FX_SOFT_TTL_SECS") {
            config.soft_ttl = Duration::seconds(secs);
        }

        if let Some(secs) = env_i64("FX_HARD_TTL_SECS") {
            config.hard_ttl = Duration::seconds(secs);
        }

        if let Some(secs) = env_i64("FX_MARKET_TTL_SECS") {
            config.market_ttl = Duration::seconds(secs);
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.soft_ttl <= Duration::zero() || self.market_ttl <= Duration::zero() {
            return Err("Cache TTLs must be positive".to_string());
        }

        if self.soft_ttl >= self.hard_ttl {
            return Err("Soft TTL must be shorter than hard TTL".to_string());
        }

        if self.max_entries == 0 {
            return Err("Cache capacity cannot be 0".to_string());
        }

        Ok(())
    }
}

/// Configuration for the HTTP rate provider.
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    /// API base URL, without trailing slash.
    pub base_url: String,
    /// API key, sent as a path segment.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: std::time::Duration,
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://v6.exchangerate-api.com/v6".to_string(),
            api_key: String::new(),
            timeout: std::time::Duration::from_secs(5),
        }
    }
}

impl HttpProviderConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("FX_API_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }

        if let Ok(key) = std::env::var("FX_API_KEY") {
            config.api_key = key;
        }

        if let Ok(ms) = std::env::var("FX_API_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.timeout = std::time::Duration::from_millis(ms);
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("FX API base URL cannot be empty".to_string());
        }

        if self.api_key.is_empty() {
            return Err("FX API key cannot be empty".to_string());
        }

        Ok(())
    }
}

fn env_i64(name: &str) -> Option<i64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
