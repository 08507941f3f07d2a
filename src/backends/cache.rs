//! Target resolution cache.
//!
//! Remembers which backend accepted a target so repeated submissions of the
//! same target skip capability probing. Entries expire after a TTL and the
//! cache is bounded; when full, expired entries go first, then the oldest.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug)]
pub struct TargetCache {
    entries: DashMap<String, (String, Instant)>,
    ttl: Duration,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl TargetCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Backend name cached for `target`, if fresh.
    pub fn get(&self, target: &str) -> Option<String> {
        self.get_at(target, Instant::now())
    }

    pub(crate) fn get_at(&self, target: &str, now: Instant) -> Option<String> {
        if self.capacity == 0 || self.ttl.is_zero() {
            return None;
        }
        let fresh = self
            .entries
            .get(target)
            .filter(|entry| now.saturating_duration_since(entry.1) < self.ttl)
            .map(|entry| entry.0.clone());
        match fresh {
            Some(name) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(name)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, target: &str, backend: &str) {
        self.insert_at(target, backend, Instant::now())
    }

    pub(crate) fn insert_at(&self, target: &str, backend: &str, now: Instant) {
        if self.capacity == 0 || self.ttl.is_zero() {
            return;
        }
        if self.entries.len() >= self.capacity && !self.entries.contains_key(target) {
            self.evict_expired_at(now);
            if self.entries.len() >= self.capacity {
                let oldest = self
                    .entries
                    .iter()
                    .min_by_key(|entry| entry.value().1)
                    .map(|entry| entry.key().clone());
                if let Some(key) = oldest {
                    self.entries.remove(&key);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.entries
            .insert(target.to_string(), (backend.to_string(), now));
    }

    /// Drop every entry pointing at `backend`.
    pub fn invalidate_backend(&self, backend: &str) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.0 != backend);
        let removed = before.saturating_sub(self.entries.len()) as u64;
        self.evictions.fetch_add(removed, Ordering::Relaxed);
    }

    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    pub(crate) fn evict_expired_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.1) < ttl);
        let removed = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_expiry_and_stats() {
        let cache = TargetCache::new(Duration::from_secs(10), 10);
        let now = Instant::now();
        cache.insert_at("t", "archive", now);

        assert_eq!(cache.get_at("t", now + Duration::from_secs(9)).as_deref(), Some("archive"));
        assert_eq!(cache.get_at("t", now + Duration::from_secs(10)), None);
        assert_eq!(cache.get_at("other", now), None);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 2));
        assert_eq!(cache.evict_expired_at(now + Duration::from_secs(10)), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = TargetCache::new(Duration::from_secs(60), 2);
        let now = Instant::now();
        cache.insert_at("a", "x", now);
        cache.insert_at("b", "x", now + Duration::from_secs(1));
        cache.insert_at("c", "y", now + Duration::from_secs(2));

        let later = now + Duration::from_secs(3);
        assert_eq!(cache.get_at("a", later), None);
        assert!(cache.get_at("b", later).is_some());
        assert!(cache.get_at("c", later).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_invalidate_backend() {
        let cache = TargetCache::new(Duration::from_secs(60), 10);
        cache.insert("a", "x");
        cache.insert("b", "y");
        cache.invalidate_backend("x");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b").as_deref(), Some("y"));
    }
}
