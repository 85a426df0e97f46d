//! Exchange-rate lookup with stale-while-revalidate caching.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use dashmap::DashSet;
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

use fxwallet_common::{age_of, normalize_code, now, CurrencyRegistry};

use crate::cache::{CacheStore, CachedRate, CachedValue, MarketRates};
use crate::config::RateCacheConfig;
use crate::error::{FxError, FxResult};
use crate::provider::RateProvider;

/// Mediates all access to the rate provider.
///
/// Pair rates younger than the soft TTL are served from cache. Older ones
/// are still served, and a detached task refetches them. Rates past the
/// hard TTL, and cold keys, are fetched before returning.
pub struct RateService {
    provider: Arc<dyn RateProvider>,
    store: Arc<dyn CacheStore>,
    registry: Arc<dyn CurrencyRegistry>,
    config: RateCacheConfig,
    refreshing: Arc<DashSet<String>>,
}

impl RateService {
    /// Create a new rate service.
    pub fn new(
        provider: Arc<dyn RateProvider>,
        store: Arc<dyn CacheStore>,
        registry: Arc<dyn CurrencyRegistry>,
        config: RateCacheConfig,
    ) -> Self {
        Self {
            provider,
            store,
            registry,
            config,
            refreshing: Arc::new(DashSet::new()),
        }
    }

    /// Cache key for a pair rate.
    pub fn rate_key(from: &str, to: &str) -> String {
        format!("fx:rate:{}:{}", normalize_code(from), normalize_code(to))
    }

    /// Cache key for a market rate table.
    pub fn market_key(base: &str) -> String {
        format!("fx:market:{}", normalize_code(base))
    }

    /// Rate converting one unit of `from` into `to`.
    #[instrument(skip(self))]
    pub async fn get_exchange_rate(&self, from: &str, to: &str) -> FxResult<Decimal> {
        let from = normalize_code(from);
        let to = normalize_code(to);
        let key = Self::rate_key(&from, &to);

        if let Some(cached) = self.store.get(&key).await.and_then(CachedValue::into_rate) {
            let age = age_of(cached.fetched_at);

            if age < self.config.soft_ttl {
                debug!(key = %key, age_ms = age.num_milliseconds(), "Fresh cached rate");
                return Ok(cached.rate);
            }

            if age < self.config.hard_ttl {
                debug!(key = %key, age_ms = age.num_milliseconds(), "Stale cached rate, refreshing");
                self.spawn_refresh(from, to, key);
                return Ok(cached.rate);
            }

            debug!(key = %key, "Cached rate past hard expiry");
        }

        fetch_and_cache(
            self.provider.as_ref(),
            self.store.as_ref(),
            &from,
            &to,
            &key,
            self.config.hard_ttl,
        )
        .await
        .map_err(|e| {
            error!(key = %key, error = %e, "Failed to fetch rate");
            FxError::unavailable(format!("{}/{}", from, to), &e)
        })
    }

    /// Rates from `base` to every active currency the provider quotes.
    #[instrument(skip(self))]
    pub async fn get_market_rates(&self, base: &str) -> FxResult<MarketRates> {
        let base = normalize_code(base);
        let key = Self::market_key(&base);

        if let Some(market) = self.store.get(&key).await.and_then(CachedValue::into_market) {
            return Ok(market);
        }

        let market = self.load_market_rates(&base).await.map_err(|e| {
            error!(base = %base, error = %e, "Failed to fetch market rates");
            FxError::unavailable(base.clone(), &e)
        })?;

        self.store
            .set(&key, CachedValue::Market(market.clone()), self.config.market_ttl)
            .await;

        info!(base = %base, count = market.rates.len(), "Market rates updated");
        Ok(market)
    }

    /// Drop a cached pair rate.
    pub async fn invalidate(&self, from: &str, to: &str) {
        self.store.remove(&Self::rate_key(from, to)).await;
    }

    /// Get the provider name.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    async fn load_market_rates(&self, base: &str) -> FxResult<MarketRates> {
        let active = self.registry.list_active().await?;
        let table = self.provider.get_rates(base).await?;

        let rates: BTreeMap<String, Decimal> = active
            .iter()
            .filter_map(|currency| {
                table
                    .get(&currency.code)
                    .filter(|rate| rate.is_sign_positive() && !rate.is_zero())
                    .map(|rate| (currency.code.clone(), *rate))
            })
            .collect();

        Ok(MarketRates {
            base: base.to_string(),
            timestamp: now(),
            rates,
        })
    }

    fn spawn_refresh(&self, from: String, to: String, key: String) {
        if !self.refreshing.insert(key.clone()) {
            debug!(key = %key, "Refresh already in flight");
            return;
        }

        let provider = self.provider.clone();
        let store = self.store.clone();
        let refreshing = self.refreshing.clone();
        let ttl = self.config.hard_ttl;

        tokio::spawn(async move {
            if let Err(e) =
                fetch_and_cache(provider.as_ref(), store.as_ref(), &from, &to, &key, ttl).await
            {
                error!(key = %key, error = %e, "Background refresh failed");
            }
            refreshing.remove(&key);
        });
    }
}

async fn fetch_and_cache(
    provider: &dyn RateProvider,
    store: &dyn CacheStore,
    from: &str,
    to: &str,
    key: &str,
    ttl: Duration,
) -> FxResult<Decimal> {
    let rate = provider.get_rate(from, to).await?;

    if rate <= Decimal::ZERO {
        warn!(provider = provider.name(), key = %key, rate = %rate, "Provider returned non-positive rate");
        return Err(FxError::InvalidRate {
            pair: format!("{}/{}", from, to),
            rate,
        });
    }

    store
        .set(key, CachedValue::Rate(CachedRate::fresh(rate)), ttl)
        .await;

    info!(provider = provider.name(), key = %key, rate = %rate, "FX rate updated");
    Ok(rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::provider::MockRateProvider;
    use fxwallet_common::{Currency, InMemoryCurrencyRegistry};
    use rust_decimal_macros::dec;
    use std::time::Duration as StdDuration;

    struct Fixture {
        provider: Arc<MockRateProvider>,
        store: Arc<MemoryCacheStore>,
        registry: Arc<InMemoryCurrencyRegistry>,
        service: RateService,
    }

    fn setup() -> Fixture {
        let provider = Arc::new(MockRateProvider::new("test"));
        provider.set_rate("NGN", "USD", dec!(0.002));
        provider.set_rate("NGN", "EUR", dec!(0.0018));
        provider.set_rate("NGN", "XAU", dec!(0.0000005));

        let store = Arc::new(MemoryCacheStore::new());
        let registry = Arc::new(InMemoryCurrencyRegistry::with_currencies([
            Currency::ngn(),
            Currency::usd(),
            Currency::eur(),
        ]));

        let service = RateService::new(
            provider.clone(),
            store.clone(),
            registry.clone(),
            RateCacheConfig::default(),
        );

        Fixture {
            provider,
            store,
            registry,
            service,
        }
    }

    async fn seed(store: &MemoryCacheStore, key: &str, rate: Decimal, age: Duration) {
        let cached = CachedRate {
            rate,
            fetched_at: now() - age,
        };
        store
            .set(key, CachedValue::Rate(cached), Duration::hours(1))
            .await;
    }

    async fn wait_for_calls(provider: &MockRateProvider, expected: usize) {
        tokio::time::timeout(StdDuration::from_secs(2), async {
            while provider.quote_calls() < expected {
                tokio::time::sleep(StdDuration::from_millis(5)).await;
            }
        })
        .await
        .expect("provider was not called in time");
    }

    #[tokio::test]
    async fn test_cold_key_fetches_synchronously() {
        let f = setup();

        let rate = f.service.get_exchange_rate("ngn", "usd").await.unwrap();

        assert_eq!(rate, dec!(0.002));
        assert_eq!(f.provider.quote_calls(), 1);
        assert!(f.store.get("fx:rate:NGN:USD").await.is_some());
    }

    #[tokio::test]
    async fn test_fresh_rate_skips_provider() {
        let f = setup();
        seed(&f.store, "fx:rate:NGN:USD", dec!(0.0025), Duration::seconds(10)).await;

        let rate = f.service.get_exchange_rate("NGN", "USD").await.unwrap();

        assert_eq!(rate, dec!(0.0025));
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert_eq!(f.provider.quote_calls(), 0);
    }

    #[tokio::test]
    async fn test_stale_rate_served_and_refreshed() {
        let f = setup();
        seed(&f.store, "fx:rate:NGN:USD", dec!(0.0025), Duration::seconds(40)).await;

        let rate = f.service.get_exchange_rate("NGN", "USD").await.unwrap();
        assert_eq!(rate, dec!(0.0025));

        wait_for_calls(&f.provider, 1).await;
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert_eq!(f.provider.quote_calls(), 1);

        let refreshed = f.service.get_exchange_rate("NGN", "USD").await.unwrap();
        assert_eq!(refreshed, dec!(0.002));
        assert_eq!(f.provider.quote_calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_refresh_deduplicated() {
        let f = setup();
        f.provider.set_latency(StdDuration::from_millis(50));
        seed(&f.store, "fx:rate:NGN:USD", dec!(0.0025), Duration::seconds(40)).await;

        for _ in 0..5 {
            assert_eq!(
                f.service.get_exchange_rate("NGN", "USD").await.unwrap(),
                dec!(0.0025)
            );
        }

        wait_for_calls(&f.provider, 1).await;
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert_eq!(f.provider.quote_calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_refresh_failure_is_swallowed() {
        let f = setup();
        f.provider.set_failing(true);
        seed(&f.store, "fx:rate:NGN:USD", dec!(0.0025), Duration::seconds(40)).await;

        let rate = f.service.get_exchange_rate("NGN", "USD").await.unwrap();
        assert_eq!(rate, dec!(0.0025));

        wait_for_calls(&f.provider, 1).await;
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        // stale value still served
        let again = f.service.get_exchange_rate("NGN", "USD").await.unwrap();
        assert_eq!(again, dec!(0.0025));
    }

    #[tokio::test]
    async fn test_hard_expired_rate_fetched_synchronously() {
        let f = setup();
        seed(&f.store, "fx:rate:NGN:USD", dec!(0.0025), Duration::hours(2)).await;

        let rate = f.service.get_exchange_rate("NGN", "USD").await.unwrap();

        assert_eq!(rate, dec!(0.002));
        assert_eq!(f.provider.quote_calls(), 1);
    }

    #[tokio::test]
    async fn test_cold_key_provider_failure() {
        let f = setup();
        f.provider.set_failing(true);

        let result = f.service.get_exchange_rate("NGN", "USD").await;

        assert!(matches!(result, Err(FxError::MarketDataUnavailable { .. })));
        assert!(f.store.get("fx:rate:NGN:USD").await.is_none());
    }

    #[tokio::test]
    async fn test_non_positive_rate_rejected() {
        let f = setup();
        f.provider.set_rate("NGN", "GBP", dec!(0));

        let result = f.service.get_exchange_rate("NGN", "GBP").await;

        assert!(matches!(result, Err(FxError::MarketDataUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_market_rates_filtered_to_active() {
        let f = setup();

        let market = f.service.get_market_rates("ngn").await.unwrap();

        assert_eq!(market.base, "NGN");
        assert_eq!(market.rates.len(), 2);
        assert_eq!(market.rates["USD"], dec!(0.002));
        assert!(!market.rates.contains_key("XAU"));
    }

    #[tokio::test]
    async fn test_market_rates_cached() {
        let f = setup();

        let first = f.service.get_market_rates("NGN").await.unwrap();
        f.registry.set_active("EUR", false);
        let second = f.service.get_market_rates("NGN").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.provider.table_calls(), 1);
    }

    #[tokio::test]
    async fn test_market_rates_provider_failure() {
        let f = setup();
        f.provider.set_failing(true);

        let result = f.service.get_market_rates("NGN").await;

        assert!(matches!(result, Err(FxError::MarketDataUnavailable { .. })));
        assert!(f.store.get("fx:market:NGN").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let f = setup();
        f.service.get_exchange_rate("NGN", "USD").await.unwrap();

        f.service.invalidate("ngn", "usd").await;
        f.service.get_exchange_rate("NGN", "USD").await.unwrap();

        assert_eq!(f.provider.quote_calls(), 2);
    }
}
