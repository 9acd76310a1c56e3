//! LRU cache bounded by entry count and estimated payload bytes, with
//! per-entry TTL checked lazily on read.
//!
//! Not internally synchronized; `ResultCache` wraps it in a mutex so that
//! every get/put is one atomic step.

use std::time::Duration;

use lru::LruCache;
use regex::Regex;
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub ttl: Duration,
    pub size_bytes: usize,
    pub access_count: u64,
    pub last_accessed_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

/// Cache counters and occupancy
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub total_bytes: usize,
    pub max_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

pub struct BoundedCache<V> {
    entries: LruCache<String, CacheEntry<V>>,
    capacity: usize,
    max_bytes: usize,
    default_ttl: Duration,
    total_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<V: Clone> BoundedCache<V> {
    pub fn new(capacity: usize, max_bytes: usize, default_ttl: Duration) -> Self {
        Self {
            entries: LruCache::unbounded(),
            capacity: capacity.max(1),
            max_bytes,
            default_ttl,
            total_bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    pub fn get(&mut self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Look up `key` as of `now`; an expired entry is removed and counts as a miss
    pub fn get_at(&mut self, key: &str, now: Instant) -> Option<V> {
        match self.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.access_count += 1;
                entry.last_accessed_at = now;
                self.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => {}
            None => {
                self.misses += 1;
                return None;
            }
        }

        self.remove(key);
        self.misses += 1;
        None
    }

    /// Insert at the most-recently-used end, then evict from the
    /// least-recently-used end until both bounds hold.
    ///
    /// Returns false (and stores nothing) when the payload alone exceeds the
    /// byte budget.
    pub fn put(&mut self, key: String, value: V, size_bytes: usize, ttl: Option<Duration>) -> bool {
        self.put_at(key, value, size_bytes, ttl, Instant::now())
    }

    pub fn put_at(
        &mut self,
        key: String,
        value: V,
        size_bytes: usize,
        ttl: Option<Duration>,
        now: Instant,
    ) -> bool {
        self.remove(&key);
        if size_bytes > self.max_bytes {
            return false;
        }

        self.entries.put(
            key,
            CacheEntry {
                value,
                created_at: now,
                ttl: ttl.unwrap_or(self.default_ttl),
                size_bytes,
                access_count: 0,
                last_accessed_at: now,
            },
        );
        self.total_bytes += size_bytes;

        while self.entries.len() > self.capacity || self.total_bytes > self.max_bytes {
            match self.entries.pop_lru() {
                Some((_, evicted)) => {
                    self.total_bytes -= evicted.size_bytes;
                    self.evictions += 1;
                }
                None => break,
            }
        }
        true
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.remove(key)
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.entries.pop(key) {
            Some(entry) => {
                self.total_bytes -= entry.size_bytes;
                true
            }
            None => false,
        }
    }

    /// Remove every entry whose key matches; returns how many were removed
    pub fn invalidate_by_pattern(&mut self, pattern: &Regex) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, _)| pattern.is_match(key))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }

    pub fn clear_expired(&mut self) -> usize {
        self.clear_expired_at(Instant::now())
    }

    pub fn clear_expired_at(&mut self, now: Instant) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }

    /// Drop all entries and reset the counters
    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
        self.hits = 0;
        self.misses = 0;
        self.evictions = 0;
    }

    /// Membership check that does not touch recency or stats
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        CacheStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            total_bytes: self.total_bytes,
            max_bytes: self.max_bytes,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    fn cache(capacity: usize, max_bytes: usize) -> BoundedCache<u32> {
        BoundedCache::new(capacity, max_bytes, TTL)
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let mut c = cache(2, 1_000);
        c.put("k1".into(), 1, 10, None);
        c.put("k2".into(), 2, 10, None);
        c.put("k3".into(), 3, 10, None);

        assert_eq!(c.get("k1"), None);
        assert_eq!(c.get("k2"), Some(2));
        assert_eq!(c.get("k3"), Some(3));
        assert_eq!(c.stats().evictions, 1);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let n = 4;
        let mut c = cache(n, 10_000);
        for i in 0..n {
            c.put(format!("k{}", i), i as u32, 10, None);
        }

        assert_eq!(c.get("k0"), Some(0));
        for i in n..2 * n - 1 {
            c.put(format!("k{}", i), i as u32, 10, None);
        }
        // k0 survived N-1 inserts after being touched; k1..k3 were evicted
        assert!(c.contains("k0"));
        assert!(!c.contains("k1"));

        c.put("last".into(), 99, 10, None);
        assert!(!c.contains("k0"));
    }

    #[test]
    fn test_refresh_keeps_key_resident_through_n_inserts() {
        let n = 3;
        let mut c = cache(n + 1, 10_000);
        for i in 0..=n {
            c.put(format!("k{}", i), i as u32, 10, None);
        }
        assert_eq!(c.get("k0"), Some(0));
        for i in 0..n {
            c.put(format!("new{}", i), i as u32, 10, None);
        }
        assert_eq!(c.get("k0"), Some(0));
    }

    #[test]
    fn test_ttl_expiry_is_a_miss_and_removes() {
        let mut c = cache(10, 1_000);
        let start = Instant::now();
        c.put_at("k".into(), 7, 10, Some(Duration::from_secs(5)), start);

        assert_eq!(c.get_at("k", start + Duration::from_secs(4)), Some(7));
        assert_eq!(c.get_at("k", start + Duration::from_secs(6)), None);
        assert!(c.is_empty());
        assert_eq!(c.total_bytes(), 0);

        let stats = c.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_byte_budget_never_exceeded() {
        let mut c = cache(100, 100);
        for i in 0..50u32 {
            c.put(format!("k{}", i), i, 7 + (i as usize % 30), None);
            assert!(c.total_bytes() <= 100);
        }
        // An oversized payload is refused outright
        assert!(!c.put("huge".into(), 0, 101, None));
        assert!(!c.contains("huge"));
        assert!(c.total_bytes() <= 100);
    }

    #[test]
    fn test_replacing_key_updates_size() {
        let mut c = cache(10, 1_000);
        c.put("k".into(), 1, 400, None);
        c.put("k".into(), 2, 100, None);
        assert_eq!(c.len(), 1);
        assert_eq!(c.total_bytes(), 100);
        assert_eq!(c.get("k"), Some(2));
    }

    #[test]
    fn test_invalidate_by_pattern_and_clear_expired() {
        let mut c = cache(10, 1_000);
        let start = Instant::now();
        c.put_at("geometry:a:x".into(), 1, 10, None, start);
        c.put_at("geometry:b:x".into(), 2, 10, None, start);
        c.put_at("texture:a:x".into(), 3, 10, Some(Duration::from_secs(1)), start);

        let removed = c.invalidate_by_pattern(&Regex::new("^geometry:").unwrap());
        assert_eq!(removed, 2);
        assert_eq!(c.len(), 1);

        assert_eq!(c.clear_expired_at(start + Duration::from_secs(2)), 1);
        assert!(c.is_empty());
        assert!(!c.delete("texture:a:x"));
    }
}
