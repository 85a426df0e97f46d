#![allow(dead_code)]

use std::sync::Arc;

use fxwallet_common::{Currency, InMemoryCurrencyRegistry};
use fxwallet_fx::{MemoryCacheStore, MockRateProvider, RateCacheConfig, RateService};
use fxwallet_ledger::{LedgerConfig, LedgerEngine, LedgerStore, MemoryLedgerStore, PgLedgerStore};
use rust_decimal_macros::dec;

pub struct Harness<S = MemoryLedgerStore> {
    pub engine: Arc<LedgerEngine>,
    pub store: S,
    pub provider: Arc<MockRateProvider>,
    pub cache: Arc<MemoryCacheStore>,
    pub registry: Arc<InMemoryCurrencyRegistry>,
}

/// Engine over a fresh in-memory store.
pub fn harness() -> Harness {
    harness_with(MemoryLedgerStore::new())
}

/// Engine over a migrated PostgreSQL store, or `None` when no database
/// URL is configured.
pub async fn pg_harness() -> Option<Harness<PgLedgerStore>> {
    let url = std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()?;

    let store = PgLedgerStore::connect(&url, 16)
        .await
        .expect("Failed to connect to test database");
    store.migrate().await.expect("Failed to run migrations");
    Some(harness_with(store))
}

pub fn harness_with<S>(store: S) -> Harness<S>
where
    S: LedgerStore + Clone + 'static,
{
    let registry = Arc::new(InMemoryCurrencyRegistry::with_currencies([
        Currency::ngn(),
        Currency::usd(),
        Currency::eur(),
        Currency::gbp(),
    ]));

    let provider = Arc::new(MockRateProvider::new("mock"));
    provider.set_rate("NGN", "USD", dec!(0.002));
    provider.set_rate("USD", "NGN", dec!(500));
    provider.set_rate("NGN", "EUR", dec!(0.0018));
    provider.set_rate("EUR", "USD", dec!(1.1));
    provider.set_rate("USD", "EUR", dec!(0.9));

    let cache = Arc::new(MemoryCacheStore::new());
    let rates = Arc::new(RateService::new(
        provider.clone(),
        cache.clone(),
        registry.clone(),
        RateCacheConfig::default(),
    ));

    let engine = Arc::new(LedgerEngine::new(
        Arc::new(store.clone()),
        registry.clone(),
        rates,
        LedgerConfig::default(),
    ));

    Harness {
        engine,
        store,
        provider,
        cache,
        registry,
    }
}
