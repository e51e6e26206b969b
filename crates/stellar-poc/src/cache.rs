//! POC cache: content-addressed, TTL + LRU result cache.
//!
//! A `DashMap` gives concurrent access to the entries; insertion order is
//! tracked separately in a `parking_lot::Mutex<VecDeque<_>>` so `set` can
//! evict the oldest entry once `max_size` is reached.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use stellar_core::PocResult;
use uuid::Uuid;

/// `(poc_id, target_hash)` cache key.
pub type CacheKey = (Uuid, String);

#[derive(Debug, Clone)]
struct CacheEntry {
    result: PocResult,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Hit/miss/eviction counters. Only `get`/`set` touch these — cold misses
/// reached through other code paths aren't counted.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.evictions.load(Ordering::Relaxed),
        )
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        if hits + misses == 0.0 {
            0.0
        } else {
            hits / (hits + misses)
        }
    }
}

/// Concurrent, content-addressed result cache shared by all POC Engine calls.
pub struct PocCache {
    entries: DashMap<CacheKey, CacheEntry>,
    order: Mutex<VecDeque<CacheKey>>,
    max_size: usize,
    ttl: chrono::Duration,
    pub stats: CacheStats,
}

impl PocCache {
    pub fn new(max_size: usize, ttl_secs: u64) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            max_size,
            ttl: chrono::Duration::seconds(ttl_secs as i64),
            stats: CacheStats::default(),
        }
    }

    /// Look up a cached result, evicting it in place if it has expired.
    pub fn get(&self, key: &CacheKey) -> Option<PocResult> {
        let expired = match self.entries.get(key) {
            Some(entry) => Utc::now() >= entry.expires_at,
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            self.entries.remove(key);
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        self.entries.get(key).map(|entry| entry.result.clone())
    }

    /// Insert a result, evicting the oldest entry first if at capacity.
    pub fn set(&self, key: CacheKey, result: PocResult) {
        if self.entries.len() >= self.max_size && !self.entries.contains_key(&key) {
            let mut order = self.order.lock();
            if let Some(oldest) = order.pop_front() {
                self.entries.remove(&oldest);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        let now = Utc::now();
        self.entries.insert(
            key.clone(),
            CacheEntry {
                result,
                created_at: now,
                expires_at: now + self.ttl,
            },
        );
        self.order.lock().push_back(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.order.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use stellar_core::PocTarget;

    fn result() -> PocResult {
        PocResult::new(
            Uuid::new_v4(),
            PocTarget {
                url: "http://a".to_string(),
                host: "a".to_string(),
                port: 80,
                scheme: "http".to_string(),
                path: "/".to_string(),
                query: String::new(),
                extras: BTreeMap::new(),
            },
        )
    }

    #[test]
    fn test_miss_then_hit() {
        let cache = PocCache::new(10, 3600);
        let key = (Uuid::new_v4(), "hash1".to_string());
        assert!(cache.get(&key).is_none());
        cache.set(key.clone(), result());
        assert!(cache.get(&key).is_some());
        let (hits, misses, _) = cache.stats.snapshot();
        assert_eq!(hits, 1);
        assert_eq!(misses, 1);
    }

    #[test]
    fn test_ttl_expiry_evicts_on_read() {
        let cache = PocCache::new(10, 0);
        let key = (Uuid::new_v4(), "hash1".to_string());
        cache.set(key.clone(), result());
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = PocCache::new(2, 3600);
        let k1 = (Uuid::new_v4(), "h1".to_string());
        let k2 = (Uuid::new_v4(), "h2".to_string());
        let k3 = (Uuid::new_v4(), "h3".to_string());
        cache.set(k1.clone(), result());
        cache.set(k2.clone(), result());
        cache.set(k3.clone(), result());

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&k1).is_none());
        assert!(cache.get(&k2).is_some());
        assert!(cache.get(&k3).is_some());
    }

    #[test]
    fn test_clear_resets_cache() {
        let cache = PocCache::new(10, 3600);
        cache.set((Uuid::new_v4(), "h".to_string()), result());
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_hit_ratio() {
        let cache = PocCache::new(10, 3600);
        let key = (Uuid::new_v4(), "h".to_string());
        cache.set(key.clone(), result());
        cache.get(&key);
        cache.get(&(Uuid::new_v4(), "missing".to_string()));
        assert!((cache.stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }
}
