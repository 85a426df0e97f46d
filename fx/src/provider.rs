//! Rate provider trait and test double.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::FxResult;

/// A remote market-data source.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Spot rate converting one unit of `from` into `to`.
    async fn get_rate(&self, from: &str, to: &str) -> FxResult<Decimal>;

    /// Full rate table for `base`, keyed by quote currency code.
    async fn get_rates(&self, base: &str) -> FxResult<HashMap<String, Decimal>>;
}

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockRateProvider;

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use dashmap::DashMap;
    use rust_decimal::Decimal;

    use super::RateProvider;
    use crate::error::{FxError, FxResult};

    /// Mock rate provider for testing. Counts calls and can be told to fail
    /// or to respond slowly.
    pub struct MockRateProvider {
        name: String,
        rates: DashMap<String, Decimal>,
        quote_calls: AtomicUsize,
        table_calls: AtomicUsize,
        failing: AtomicBool,
        latency_ms: AtomicU64,
    }

    impl MockRateProvider {
        /// Create a new mock provider.
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                rates: DashMap::new(),
                quote_calls: AtomicUsize::new(0),
                table_calls: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
                latency_ms: AtomicU64::new(0),
            }
        }

        /// Set a rate for a currency pair.
        pub fn set_rate(&self, from: &str, to: &str, rate: Decimal) {
            self.rates.insert(Self::key(from, to), rate);
        }

        /// Make every subsequent call fail (or succeed again).
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Delay every subsequent call.
        pub fn set_latency(&self, latency: Duration) {
            self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
        }

        /// Number of `get_rate` calls received.
        pub fn quote_calls(&self) -> usize {
            self.quote_calls.load(Ordering::SeqCst)
        }

        /// Number of `get_rates` calls received.
        pub fn table_calls(&self) -> usize {
            self.table_calls.load(Ordering::SeqCst)
        }

        fn key(from: &str, to: &str) -> String {
            format!("{}/{}", from.to_uppercase(), to.to_uppercase())
        }

        async fn simulate(&self) -> FxResult<()> {
            let latency = self.latency_ms.load(Ordering::SeqCst);
            if latency > 0 {
                tokio::time::sleep(Duration::from_millis(latency)).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(FxError::ProviderError(format!("{} is down", self.name)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RateProvider for MockRateProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn get_rate(&self, from: &str, to: &str) -> FxResult<Decimal> {
            self.quote_calls.fetch_add(1, Ordering::SeqCst);
            self.simulate().await?;

            let key = Self::key(from, to);
            self.rates
                .get(&key)
                .map(|r| *r)
                .ok_or(FxError::RateNotAvailable(key))
        }

        async fn get_rates(&self, base: &str) -> FxResult<HashMap<String, Decimal>> {
            self.table_calls.fetch_add(1, Ordering::SeqCst);
            self.simulate().await?;

            let prefix = format!("{}/", base.to_uppercase());
            let table: HashMap<String, Decimal> = self
                .rates
                .iter()
                .filter_map(|entry| {
                    entry
                        .key()
                        .strip_prefix(&prefix)
                        .map(|quote| (quote.to_string(), *entry.value()))
                })
                .collect();

            if table.is_empty() {
                return Err(FxError::RateNotAvailable(base.to_uppercase()));
            }
            Ok(table)
        }
    }
}
