use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;

use super::{CacheBackend, CacheHit};

struct MemoryEntry {
    payload: String,
    subject: Option<String>,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Volatile in-process cache backend.
///
/// Lowest latency, cleared on restart. Bounded: at capacity the entry
/// closest to expiry is evicted to make room.
pub struct MemoryCache {
    data: RwLock<HashMap<String, MemoryEntry>>,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_soonest_expiring(&self, data: &mut HashMap<String, MemoryEntry>) {
        let victim = data
            .iter()
            .min_by_key(|(_, entry)| entry.expires_at)
            .map(|(k, _)| k.clone());
        if let Some(victim) = victim {
            data.remove(&victim);
        }
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<CacheHit>> {
        let now = Instant::now();

        {
            let data = self.data.read();
            match data.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    return Ok(Some(CacheHit {
                        payload: entry.payload.clone(),
                        expires_in: entry.expires_at - now,
                    }));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired: delete lazily under the write lock.
        let mut data = self.data.write();
        if data.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
            data.remove(key);
        }
        Ok(None)
    }

    fn set(&self, key: &str, payload: &str, subject: Option<&str>, ttl: Duration) -> Result<()> {
        let mut data = self.data.write();
        if data.len() >= self.max_entries && !data.contains_key(key) {
            self.evict_soonest_expiring(&mut data);
        }
        data.insert(
            key.to_string(),
            MemoryEntry {
                payload: payload.to_string(),
                subject: subject.map(str::to_string),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.data.write().remove(key);
        Ok(())
    }

    fn remove_matching(&self, fragment: &str) -> Result<usize> {
        let mut data = self.data.write();
        let before = data.len();
        data.retain(|key, _| !key.contains(fragment));
        Ok(before - data.len())
    }

    fn remove_by_subject(&self, subject: &str) -> Result<usize> {
        let mut data = self.data.write();
        let before = data.len();
        data.retain(|_, entry| entry.subject.as_deref() != Some(subject));
        Ok(before - data.len())
    }

    fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut data = self.data.write();
        let before = data.len();
        data.retain(|_, entry| !entry.is_expired(now));
        Ok(before - data.len())
    }
}
