//! Keyed rate limiter.
//!
//! # Responsibilities
//! - Admission control per key (backend name, caller id) with one algorithm
//! - Per-key quota overrides
//! - Penalty backoff when a backend signals it is being rate limited
//! - TTL-based eviction of idle keys
//!
//! # Design Decisions
//! - Buckets live in a `DashMap`, so different keys never contend on one lock
//! - An acquisition holds its key's shard lock for the whole check-and-consume,
//!   and eviction goes through the same map, so it never interleaves with one
//! - Bucket TTL is never shorter than the quota window; an evicted bucket is
//!   indistinguishable from a fresh one

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::config::{ConfigError, QuotaConfig, RateLimitAlgorithm, RateLimitConfig};
use crate::config::validation::validate_quota;
use crate::observability::metrics;
use crate::rate_limit::algorithms::{Bucket, Quota};

/// Error for the blocking [`RateLimiter::acquire`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("cost {cost} for key {key} exceeds bucket capacity {capacity}")]
    CostExceedsCapacity { key: String, cost: u64, capacity: u64 },
}

/// Remaining capacity of one tracked key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyUsage {
    pub key: String,
    pub remaining: u64,
    pub capacity: u64,
    pub penalized_ms: Option<u64>,
}

/// Limiter utilization, as exposed in the stats snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterStats {
    pub algorithm: RateLimitAlgorithm,
    pub enabled: bool,
    pub tracked_keys: usize,
    pub admitted: u64,
    pub rejected: u64,
    pub keys: Vec<KeyUsage>,
}

pub struct RateLimiter {
    algorithm: RateLimitAlgorithm,
    enabled: bool,
    default_quota: Quota,
    ttl: Duration,
    overrides: DashMap<String, Quota>,
    buckets: DashMap<String, Bucket>,
    admitted: AtomicU64,
    rejected: AtomicU64,
    /// Metric label; see [`RateLimiter::scoped`].
    scope: &'static str,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("algorithm", &self.algorithm)
            .field("enabled", &self.enabled)
            .field("default_quota", &self.default_quota)
            .field("tracked_keys", &self.buckets.len())
            .finish()
    }
}

impl RateLimiter {
    /// Build a limiter; an invalid quota is rejected here, never at acquire time.
    pub fn new(config: &RateLimitConfig) -> Result<Self, ConfigError> {
        let mut errors = Vec::new();
        validate_quota("rate_limit.quota", &config.quota, &mut errors);
        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors));
        }
        let default_quota = Quota::from(config.quota);
        Ok(Self {
            algorithm: config.algorithm,
            enabled: config.enabled,
            default_quota,
            ttl: config.bucket_ttl().max(default_quota.window),
            overrides: DashMap::new(),
            buckets: DashMap::new(),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            scope: metrics::BACKEND_LIMITER,
        })
    }

    /// A limiter that admits everything.
    pub fn disabled() -> Self {
        Self {
            algorithm: RateLimitAlgorithm::TokenBucket,
            enabled: false,
            default_quota: Quota::new(1, Duration::from_secs(1)),
            ttl: Duration::from_secs(1),
            overrides: DashMap::new(),
            buckets: DashMap::new(),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            scope: metrics::BACKEND_LIMITER,
        }
    }

    /// Set the `limiter` label reported on rejections.
    pub fn scoped(mut self, scope: &'static str) -> Self {
        self.scope = scope;
        self
    }

    pub fn scope(&self) -> &'static str {
        self.scope
    }

    pub fn algorithm(&self) -> RateLimitAlgorithm {
        self.algorithm
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Give `key` its own quota; any existing state for the key is dropped.
    pub fn set_quota(&self, key: &str, quota: Quota) -> Result<(), ConfigError> {
        if quota.max_requests == 0 || quota.window.is_zero() {
            let mut errors = Vec::new();
            let as_config = QuotaConfig {
                max_requests: quota.max_requests,
                window_secs: quota.window.as_secs(),
                burst: quota.burst,
            };
            validate_quota(&format!("rate_limit.{key}"), &as_config, &mut errors);
            return Err(ConfigError::Validation(errors));
        }
        self.overrides.insert(key.to_string(), quota);
        self.buckets.remove(key);
        Ok(())
    }

    pub fn quota_for(&self, key: &str) -> Quota {
        self.overrides
            .get(key)
            .map(|q| *q)
            .unwrap_or(self.default_quota)
    }

    /// Non-blocking; consumes `cost` if it fits.
    pub fn try_acquire(&self, key: &str, cost: u64) -> bool {
        self.try_acquire_at(key, cost, Instant::now())
    }

    pub(crate) fn try_acquire_at(&self, key: &str, cost: u64, now: Instant) -> bool {
        if !self.enabled || cost == 0 {
            return true;
        }
        let admitted = match self.buckets.get_mut(key) {
            Some(mut bucket) => bucket.try_acquire(cost, now),
            None => {
                let quota = self.quota_for(key);
                let mut entry = self
                    .buckets
                    .entry(key.to_string())
                    .or_insert_with(|| Bucket::new(self.algorithm, quota, now));
                entry.try_acquire(cost, now)
            }
        };
        if admitted {
            self.admitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            metrics::record_rate_limited(self.scope);
            tracing::debug!(key = %key, cost, "Rate limit exceeded");
        }
        admitted
    }

    /// How long until `try_acquire(key, cost)` would succeed, without consuming.
    ///
    /// `Duration::MAX` if `cost` exceeds the key's capacity.
    pub fn wait_time(&self, key: &str, cost: u64) -> Duration {
        self.wait_time_at(key, cost, Instant::now())
    }

    pub(crate) fn wait_time_at(&self, key: &str, cost: u64, now: Instant) -> Duration {
        if !self.enabled || cost == 0 {
            return Duration::ZERO;
        }
        let waited = match self.buckets.get(key) {
            Some(bucket) => bucket.wait_time(cost, now),
            None => {
                let quota = self.quota_for(key);
                (cost <= quota.capacity()).then_some(Duration::ZERO)
            }
        };
        waited.unwrap_or(Duration::MAX)
    }

    /// Best-effort remaining capacity for introspection.
    pub fn remaining_quota(&self, key: &str) -> u64 {
        self.remaining_quota_at(key, Instant::now())
    }

    pub(crate) fn remaining_quota_at(&self, key: &str, now: Instant) -> u64 {
        match self.buckets.get(key) {
            Some(bucket) => bucket.remaining(now),
            None => self.quota_for(key).capacity(),
        }
    }

    /// Block until `cost` is admitted for `key`.
    pub async fn acquire(&self, key: &str, cost: u64) -> Result<(), RateLimitError> {
        let capacity = self.quota_for(key).capacity();
        if self.enabled && cost > capacity {
            return Err(RateLimitError::CostExceedsCapacity {
                key: key.to_string(),
                cost,
                capacity,
            });
        }
        loop {
            if self.try_acquire(key, cost) {
                return Ok(());
            }
            let wait = self.wait_time(key, cost).max(Duration::from_millis(1));
            tokio::time::sleep(wait).await;
        }
    }

    /// Refuse every acquisition for `key` for the next `duration`.
    pub fn penalize(&self, key: &str, duration: Duration) {
        let now = Instant::now();
        let quota = self.quota_for(key);
        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(self.algorithm, quota, now))
            .penalize(now + duration);
        tracing::warn!(key = %key, penalty_ms = duration.as_millis() as u64, "Rate limit penalty applied");
    }

    /// Forget all state for `key`; returns whether anything was tracked.
    pub fn reset(&self, key: &str) -> bool {
        self.buckets.remove(key).is_some()
    }

    /// Drop buckets idle for at least the TTL; returns how many were evicted.
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    pub(crate) fn evict_expired_at(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        let ttl = self.ttl;
        self.buckets.retain(|_, bucket| !bucket.is_idle(now, ttl));
        let evicted = before.saturating_sub(self.buckets.len());
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted idle rate limit buckets");
        }
        evicted
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }

    pub fn stats(&self) -> RateLimiterStats {
        let now = Instant::now();
        let mut keys: Vec<KeyUsage> = self
            .buckets
            .iter()
            .map(|entry| KeyUsage {
                key: entry.key().clone(),
                remaining: entry.remaining(now),
                capacity: entry.quota().capacity(),
                penalized_ms: entry.penalty_remaining(now).map(|d| d.as_millis() as u64),
            })
            .collect();
        keys.sort_by(|a, b| a.key.cmp(&b.key));
        RateLimiterStats {
            algorithm: self.algorithm,
            enabled: self.enabled,
            tracked_keys: keys.len(),
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            keys,
        }
    }
}

#[cfg(test)]
mod tests {
    use ::metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};

    use super::*;

    fn limiter(algorithm: RateLimitAlgorithm, max: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            enabled: true,
            algorithm,
            quota: QuotaConfig {
                max_requests: max,
                window_secs,
                burst: 0,
            },
            bucket_ttl_secs: window_secs,
        })
        .unwrap()
    }

    #[test]
    fn test_keys_are_independent() {
        let rl = limiter(RateLimitAlgorithm::FixedWindow, 1, 60);
        let now = Instant::now();
        assert!(rl.try_acquire_at("a", 1, now));
        assert!(!rl.try_acquire_at("a", 1, now));
        assert!(rl.try_acquire_at("b", 1, now));

        let stats = rl.stats();
        assert_eq!(stats.tracked_keys, 2);
        assert_eq!(stats.admitted, 2);
        assert_eq!(stats.rejected, 1);
    }

    #[test]
    fn test_per_key_override() {
        let rl = limiter(RateLimitAlgorithm::SlidingWindow, 1, 60);
        rl.set_quota("wide", Quota::new(3, Duration::from_secs(60))).unwrap();
        let now = Instant::now();
        assert_eq!(rl.remaining_quota_at("wide", now), 3);
        for _ in 0..3 {
            assert!(rl.try_acquire_at("wide", 1, now));
        }
        assert!(!rl.try_acquire_at("wide", 1, now));
        assert!(rl.set_quota("bad", Quota::new(0, Duration::from_secs(1))).is_err());
    }

    #[test]
    fn test_eviction_respects_ttl() {
        let rl = limiter(RateLimitAlgorithm::SlidingWindow, 5, 60);
        let now = Instant::now();
        rl.try_acquire_at("idle", 1, now);
        rl.try_acquire_at("busy", 1, now + Duration::from_secs(50));

        assert_eq!(rl.evict_expired_at(now + Duration::from_secs(59)), 0);
        assert_eq!(rl.evict_expired_at(now + Duration::from_secs(60)), 1);
        assert_eq!(rl.tracked_keys(), 1);
        assert_eq!(rl.remaining_quota_at("idle", now + Duration::from_secs(60)), 5);
    }

    #[test]
    fn test_wait_time_for_oversized_cost() {
        let rl = limiter(RateLimitAlgorithm::TokenBucket, 2, 1);
        assert_eq!(rl.wait_time("k", 3), Duration::MAX);
        assert_eq!(rl.wait_time("k", 2), Duration::ZERO);
    }

    #[test]
    fn test_disabled_admits_everything() {
        let rl = RateLimiter::disabled();
        for _ in 0..100 {
            assert!(rl.try_acquire("k", 1));
        }
        assert_eq!(rl.tracked_keys(), 0);
    }

    #[test]
    fn test_invalid_quota_rejected_at_construction() {
        let config = RateLimitConfig {
            quota: QuotaConfig {
                max_requests: 0,
                window_secs: 60,
                burst: 0,
            },
            ..RateLimitConfig::default()
        };
        assert!(RateLimiter::new(&config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_blocks_until_window_rolls() {
        let rl = limiter(RateLimitAlgorithm::FixedWindow, 1, 10);
        let start = Instant::now();
        rl.acquire("k", 1).await.unwrap();
        rl.acquire("k", 1).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(10));

        let err = rl.acquire("k", 5).await.unwrap_err();
        assert!(matches!(err, RateLimitError::CostExceedsCapacity { capacity: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_penalize_and_reset() {
        let rl = limiter(RateLimitAlgorithm::TokenBucket, 10, 1);
        rl.penalize("backend", Duration::from_secs(3));
        assert!(!rl.try_acquire("backend", 1));
        assert!(rl.wait_time("backend", 1) >= Duration::from_secs(2));
        assert!(rl.stats().keys[0].penalized_ms.is_some());

        assert!(rl.reset("backend"));
        assert!(rl.try_acquire("backend", 1));
    }

    /// Records the labels of every counter registration.
    #[derive(Default)]
    struct LabelCapture(parking_lot::Mutex<Vec<(String, Vec<(String, String)>)>>);

    impl Recorder for LabelCapture {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            let labels = key
                .labels()
                .map(|l| (l.key().to_string(), l.value().to_string()))
                .collect();
            self.0.lock().push((key.name().to_string(), labels));
            Counter::noop()
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    #[test]
    fn test_rejections_are_labelled_by_limiter_not_key() {
        let callers =
            limiter(RateLimitAlgorithm::FixedWindow, 1, 60).scoped(metrics::CALLER_LIMITER);
        let backends = limiter(RateLimitAlgorithm::FixedWindow, 1, 60);
        assert_eq!(backends.scope(), metrics::BACKEND_LIMITER);

        let capture = LabelCapture::default();
        ::metrics::with_local_recorder(&capture, || {
            let now = Instant::now();
            for i in 0..3 {
                let caller = format!("caller-{i}");
                assert!(callers.try_acquire_at(&caller, 1, now));
                assert!(!callers.try_acquire_at(&caller, 1, now));
            }
            assert!(backends.try_acquire_at("pages", 1, now));
            assert!(!backends.try_acquire_at("pages", 1, now));
        });

        let registered = capture.0.lock();
        let rejected: Vec<_> = registered
            .iter()
            .filter(|(name, _)| name == "core_rate_limited_total")
            .map(|(_, labels)| labels.clone())
            .collect();
        assert_eq!(rejected.len(), 4);
        let caller_label = vec![("limiter".to_string(), "caller".to_string())];
        assert!(rejected[..3].iter().all(|labels| *labels == caller_label));
        assert_eq!(rejected[3], vec![("limiter".to_string(), "backend".to_string())]);
        assert!(!rejected.iter().flatten().any(|(_, value)| value.starts_with("caller-")));
    }
}
