/// Tiered cache store for the data-access layer.
///
/// Two interchangeable backends sit behind one interface: a volatile
/// in-process map and a durable table shared through the portal database.
/// The tiered store checks volatile first, falls through to durable, and
/// promotes durable hits back into the volatile tier (write-through on
/// read). Backend failures never surface to callers: a failed `get`
/// degrades to a miss, a failed `set` is logged and swallowed.
pub mod durable;
pub mod keys;
pub mod memory;

pub use durable::DurableCache;
pub use keys::cache_key;
pub use memory::MemoryCache;

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use crate::core::constants;
use crate::database::Database;

/// Cache categories with their production TTLs.
///
/// TTL and expiry computation live here and in the backends only; no cache
/// consumer compares timestamps itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    Config,
    PropertyData,
    UserData,
    ApiUsage,
    MarketData,
}

impl CacheCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheCategory::Config => "config",
            CacheCategory::PropertyData => "property_data",
            CacheCategory::UserData => "user_data",
            CacheCategory::ApiUsage => "api_usage",
            CacheCategory::MarketData => "market_data",
        }
    }

    pub fn ttl(&self) -> Duration {
        let secs = match self {
            CacheCategory::Config => constants::CONFIG_CACHE_TTL_SECS,
            CacheCategory::PropertyData => constants::PROPERTY_DATA_TTL_SECS,
            CacheCategory::UserData => constants::USER_DATA_TTL_SECS,
            CacheCategory::ApiUsage => constants::API_USAGE_TTL_SECS,
            CacheCategory::MarketData => constants::MARKET_DATA_TTL_SECS,
        };
        Duration::from_secs(secs)
    }
}

/// A live cache entry returned by a backend, with its remaining lifetime.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub payload: String,
    pub expires_in: Duration,
}

/// Contract satisfied by both cache backends.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<CacheHit>>;
    fn set(&self, key: &str, payload: &str, subject: Option<&str>, ttl: Duration) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn remove_matching(&self, fragment: &str) -> Result<usize>;
    fn remove_by_subject(&self, subject: &str) -> Result<usize>;
    fn purge_expired(&self) -> Result<usize>;
}

/// Per-category hit/miss counters.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn total(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.hits as f64 / self.total() as f64
        }
    }
}

/// The cache store handed to the resilient client.
pub struct TieredCache {
    memory: MemoryCache,
    durable: Option<DurableCache>,
    stats: Mutex<HashMap<CacheCategory, CacheStats>>,
}

impl TieredCache {
    /// Volatile-only store.
    pub fn new(max_memory_entries: usize) -> Self {
        Self {
            memory: MemoryCache::new(max_memory_entries),
            durable: None,
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Volatile tier in front of the shared durable table.
    pub fn with_durable(max_memory_entries: usize, db: Database) -> Self {
        Self {
            memory: MemoryCache::new(max_memory_entries),
            durable: Some(DurableCache::new(db)),
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a key. Expired and missing entries are both misses; backend
    /// I/O errors degrade to a miss.
    pub fn get(&self, key: &str, category: CacheCategory) -> Option<String> {
        match self.memory.get(key) {
            Ok(Some(hit)) => {
                self.record(category, true);
                return Some(hit.payload);
            }
            Ok(None) => {}
            Err(e) => log::warn!("Memory cache read failed for {}: {}", key, e),
        }

        if let Some(durable) = &self.durable {
            match durable.get(key) {
                Ok(Some(hit)) => {
                    // Promote into the volatile tier for the remaining TTL.
                    if let Err(e) =
                        self.memory
                            .set(key, &hit.payload, keys::subject_of(key), hit.expires_in)
                    {
                        log::warn!("Cache promotion failed for {}: {}", key, e);
                    }
                    self.record(category, true);
                    return Some(hit.payload);
                }
                Ok(None) => {}
                Err(e) => log::warn!("Durable cache read failed for {}: {}", key, e),
            }
        }

        self.record(category, false);
        None
    }

    /// Upsert a key into both tiers. Caching is best-effort; failures are
    /// logged and swallowed.
    pub fn set(
        &self,
        key: &str,
        payload: &str,
        category: CacheCategory,
        ttl_override: Option<Duration>,
    ) {
        let ttl = ttl_override.unwrap_or_else(|| category.ttl());
        if ttl.is_zero() {
            log::warn!("Refusing zero-TTL cache write for {}", key);
            return;
        }

        let subject = keys::subject_of(key);
        if let Err(e) = self.memory.set(key, payload, subject, ttl) {
            log::warn!("Memory cache write failed for {}: {}", key, e);
        }
        if let Some(durable) = &self.durable {
            if let Err(e) = durable.set(key, payload, subject, ttl) {
                log::warn!("Durable cache write failed for {}: {}", key, e);
            }
        }
    }

    pub fn invalidate(&self, key: &str) {
        if let Err(e) = self.memory.remove(key) {
            log::warn!("Memory cache invalidation failed for {}: {}", key, e);
        }
        if let Some(durable) = &self.durable {
            if let Err(e) = durable.remove(key) {
                log::warn!("Durable cache invalidation failed for {}: {}", key, e);
            }
        }
    }

    /// Drop every entry whose key contains `fragment`.
    pub fn invalidate_by_prefix(&self, fragment: &str) -> usize {
        let mut removed = 0;
        match self.memory.remove_matching(fragment) {
            Ok(n) => removed += n,
            Err(e) => log::warn!("Memory cache pattern invalidation failed: {}", e),
        }
        if let Some(durable) = &self.durable {
            match durable.remove_matching(fragment) {
                Ok(n) => removed += n,
                Err(e) => log::warn!("Durable cache pattern invalidation failed: {}", e),
            }
        }
        removed
    }

    /// Drop every entry scoped to `subject`, leaving other subjects and
    /// unscoped entries untouched.
    pub fn invalidate_by_subject(&self, subject: &str) -> usize {
        let mut removed = 0;
        match self.memory.remove_by_subject(subject) {
            Ok(n) => removed += n,
            Err(e) => log::warn!("Memory cache subject invalidation failed: {}", e),
        }
        if let Some(durable) = &self.durable {
            match durable.remove_by_subject(subject) {
                Ok(n) => removed += n,
                Err(e) => log::warn!("Durable cache subject invalidation failed: {}", e),
            }
        }
        removed
    }

    /// Eager cleanup sweep across both tiers.
    pub fn purge_expired(&self) -> usize {
        let mut removed = 0;
        match self.memory.purge_expired() {
            Ok(n) => removed += n,
            Err(e) => log::warn!("Memory cache sweep failed: {}", e),
        }
        if let Some(durable) = &self.durable {
            match durable.purge_expired() {
                Ok(n) => removed += n,
                Err(e) => log::warn!("Durable cache sweep failed: {}", e),
            }
        }
        removed
    }

    pub fn stats(&self, category: CacheCategory) -> CacheStats {
        self.stats.lock().get(&category).cloned().unwrap_or_default()
    }

    pub fn all_stats(&self) -> HashMap<CacheCategory, CacheStats> {
        self.stats.lock().clone()
    }

    fn record(&self, category: CacheCategory, hit: bool) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(category).or_default();
        if hit {
            entry.hits += 1;
        } else {
            entry.misses += 1;
        }
    }
}
