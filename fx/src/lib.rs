//! fxwallet FX Rate Cache
//!
//! Exchange-rate lookup for currency trades, shielding callers from a slow
//! or unavailable market-data provider.
//!
//! # Features
//!
//! - Pluggable rate providers (HTTP, mock)
//! - Injected cache store with per-key TTL
//! - Stale-while-revalidate for pair rates, with a hard expiry
//! - Market rate tables filtered to the active currencies
//!
//! # Example
//!
//! ```rust,ignore
//! use fxwallet_fx::{RateService, RateCacheConfig, MemoryCacheStore, ExchangeRateApiProvider};
//!
//! let service = RateService::new(provider, Arc::new(MemoryCacheStore::new()), registry, RateCacheConfig::default());
//!
//! let rate = service.get_exchange_rate("NGN", "USD").await?;
//! let table = service.get_market_rates("NGN").await?;
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod provider;
pub mod service;

pub use cache::{CacheStore, CachedRate, CachedValue, MarketRates, MemoryCacheStore};
pub use config::{HttpProviderConfig, RateCacheConfig};
pub use error::{FxError, FxResult};
pub use http::ExchangeRateApiProvider;
pub use provider::RateProvider;
#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateProvider;
pub use service::RateService;
