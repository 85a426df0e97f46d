//! Currency registry contract and an in-memory implementation.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::RegistryResult;
use crate::monetary::{normalize_code, Currency};

/// Read-only view of the currency registry.
#[async_trait]
pub trait CurrencyRegistry: Send + Sync {
    /// Resolve a code to its currency, active or not.
    async fn resolve(&self, code: &str) -> RegistryResult<Option<Currency>>;

    /// List all active currencies.
    async fn list_active(&self) -> RegistryResult<Vec<Currency>>;

    /// Resolve a code and keep it only if active.
    async fn resolve_active(&self, code: &str) -> RegistryResult<Option<Currency>> {
        Ok(self.resolve(code).await?.filter(|c| c.is_active))
    }
}

/// Registry held in memory. Seeded at startup or by tests.
#[derive(Debug, Default)]
pub struct InMemoryCurrencyRegistry {
    currencies: DashMap<String, Currency>,
}

impl InMemoryCurrencyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry seeded with the given currencies.
    pub fn with_currencies(currencies: impl IntoIterator<Item = Currency>) -> Self {
        let registry = Self::new();
        for currency in currencies {
            registry.insert(currency);
        }
        registry
    }

    /// Insert or replace a currency.
    pub fn insert(&self, currency: Currency) {
        self.currencies.insert(currency.code.clone(), currency);
    }

    /// Toggle a currency. Returns false if the code is unknown.
    pub fn set_active(&self, code: &str, is_active: bool) -> bool {
        match self.currencies.get_mut(&normalize_code(code)) {
            Some(mut currency) => {
                currency.is_active = is_active;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl CurrencyRegistry for InMemoryCurrencyRegistry {
    async fn resolve(&self, code: &str) -> RegistryResult<Option<Currency>> {
        Ok(self.currencies.get(&normalize_code(code)).map(|c| c.clone()))
    }

    async fn list_active(&self) -> RegistryResult<Vec<Currency>> {
        let mut active: Vec<Currency> = self
            .currencies
            .iter()
            .filter(|c| c.is_active)
            .map(|c| c.clone())
            .collect();
        active.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(active)
    }
}
