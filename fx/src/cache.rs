//! Cache store contract and an in-memory store with per-key TTL.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A pair rate together with the time it was fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRate {
    pub rate: Decimal,
    pub fetched_at: DateTime<Utc>,
}

impl CachedRate {
    /// A rate fetched now.
    pub fn fresh(rate: Decimal) -> Self {
        Self {
            rate,
            fetched_at: Utc::now(),
        }
    }
}

/// Rate table for one base currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRates {
    pub base: String,
    pub timestamp: DateTime<Utc>,
    pub rates: BTreeMap<String, Decimal>,
}

/// Values the rate cache stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CachedValue {
    Rate(CachedRate),
    Market(MarketRates),
}

impl CachedValue {
    pub fn into_rate(self) -> Option<CachedRate> {
        match self {
            CachedValue::Rate(rate) => Some(rate),
            CachedValue::Market(_) => None,
        }
    }

    pub fn into_market(self) -> Option<MarketRates> {
        match self {
            CachedValue::Market(market) => Some(market),
            CachedValue::Rate(_) => None,
        }
    }
}

/// Key-value store with per-key TTL.
///
/// Lookups never fail: a backend that cannot answer reports a miss.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a value if present and not past its TTL.
    async fn get(&self, key: &str) -> Option<CachedValue>;

    /// Insert or replace a value.
    async fn set(&self, key: &str, value: CachedValue, ttl: Duration);

    /// Remove a value.
    async fn remove(&self, key: &str);
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedValue,
    cached_at: DateTime<Utc>,
    ttl: Duration,
}

impl CacheEntry {
    fn new(value: CachedValue, ttl: Duration) -> Self {
        Self {
            value,
            cached_at: Utc::now(),
            ttl,
        }
    }

    fn is_valid(&self) -> bool {
        Utc::now().signed_duration_since(self.cached_at) < self.ttl
    }
}

/// Thread-safe in-memory cache store.
pub struct MemoryCacheStore {
    cache: DashMap<String, CacheEntry>,
    max_entries: usize,
}

impl MemoryCacheStore {
    /// Create a store with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(10000)
    }

    /// Create a store holding at most `max_entries` keys.
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            cache: DashMap::new(),
            max_entries,
        }
    }

    /// Get the number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Evict expired entries.
    pub fn evict_expired(&self) {
        self.cache.retain(|_, entry| entry.is_valid());
    }

    /// Evict the entry cached longest ago. Returns false when empty.
    fn evict_oldest(&self) -> bool {
        let oldest = self
            .cache
            .iter()
            .min_by_key(|entry| entry.value().cached_at)
            .map(|entry| entry.key().clone());

        match oldest {
            Some(key) => {
                debug!(key = %key, "Evicting oldest cache entry");
                self.cache.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Get store statistics.
    pub fn stats(&self) -> CacheStats {
        let total = self.cache.len();
        let valid = self.cache.iter().filter(|e| e.is_valid()).count();

        CacheStats {
            total_entries: total,
            valid_entries: valid,
            expired_entries: total - valid,
        }
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Option<CachedValue> {
        if let Some(entry) = self.cache.get(key) {
            if entry.is_valid() {
                debug!(key = %key, "Cache hit");
                return Some(entry.value.clone());
            }
            debug!(key = %key, "Cache entry expired");
            drop(entry);
            self.cache.remove(key);
        }

        debug!(key = %key, "Cache miss");
        None
    }

    async fn set(&self, key: &str, value: CachedValue, ttl: Duration) {
        if self.cache.len() >= self.max_entries && !self.cache.contains_key(key) {
            self.evict_expired();
            while self.cache.len() >= self.max_entries.max(1) {
                if !self.evict_oldest() {
                    break;
                }
            }
        }

        self.cache.insert(key.to_string(), CacheEntry::new(value, ttl));
    }

    async fn remove(&self, key: &str) {
        self.cache.remove(key);
    }
}

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
}
