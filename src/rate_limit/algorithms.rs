//! Per-key bucket state for the four admission algorithms.
//!
//! Every bucket is sized from a [`Quota`]: `capacity = max_requests + burst`
//! admitted per `window`.
//!
//! - Token bucket: starts full at `capacity`, refills `max_requests` per window.
//! - Sliding window: admitted costs with timestamps; only the last `window` counts.
//! - Fixed window: a counter reset every `window`, starting at the first request.
//! - Leaky bucket: a level that drains at `max_requests` per window and may
//!   never exceed `capacity`.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::{QuotaConfig, RateLimitAlgorithm};

/// Admission quota for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub max_requests: u32,
    pub window: Duration,
    pub burst: u32,
}

impl Quota {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            burst: 0,
        }
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    pub fn capacity(&self) -> u64 {
        self.max_requests as u64 + self.burst as u64
    }

    /// Drain / refill rate in units per second.
    fn rate(&self) -> f64 {
        self.max_requests as f64 / self.window.as_secs_f64().max(f64::EPSILON)
    }
}

impl From<QuotaConfig> for Quota {
    fn from(config: QuotaConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window: config.window(),
            burst: config.burst,
        }
    }
}

#[derive(Debug)]
enum BucketState {
    TokenBucket {
        tokens: f64,
        last_refill: Instant,
    },
    SlidingWindow {
        admitted: VecDeque<(Instant, u64)>,
        used: u64,
    },
    FixedWindow {
        window_start: Instant,
        count: u64,
    },
    LeakyBucket {
        level: f64,
        last_leak: Instant,
    },
}

/// Algorithm state plus bookkeeping for one key.
#[derive(Debug)]
pub struct Bucket {
    quota: Quota,
    state: BucketState,
    last_seen: Instant,
    penalty_until: Option<Instant>,
}

impl Bucket {
    pub fn new(algorithm: RateLimitAlgorithm, quota: Quota, now: Instant) -> Self {
        let state = match algorithm {
            RateLimitAlgorithm::TokenBucket => BucketState::TokenBucket {
                tokens: quota.capacity() as f64,
                last_refill: now,
            },
            RateLimitAlgorithm::SlidingWindow => BucketState::SlidingWindow {
                admitted: VecDeque::new(),
                used: 0,
            },
            RateLimitAlgorithm::FixedWindow => BucketState::FixedWindow {
                window_start: now,
                count: 0,
            },
            RateLimitAlgorithm::LeakyBucket => BucketState::LeakyBucket {
                level: 0.0,
                last_leak: now,
            },
        };
        Self {
            quota,
            state,
            last_seen: now,
            penalty_until: None,
        }
    }

    pub fn quota(&self) -> Quota {
        self.quota
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn penalty_remaining(&self, now: Instant) -> Option<Duration> {
        self.penalty_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    pub fn penalize(&mut self, until: Instant) {
        self.penalty_until = Some(match self.penalty_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }

    /// Whether the bucket carries no state worth keeping at `now`.
    pub fn is_idle(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) >= ttl
            && self.penalty_remaining(now).is_none()
    }

    /// Consume `cost` if it fits; returns whether it was admitted.
    pub fn try_acquire(&mut self, cost: u64, now: Instant) -> bool {
        self.last_seen = now;
        if self.penalty_remaining(now).is_some() {
            return false;
        }
        let quota = self.quota;
        let capacity = quota.capacity();
        if cost > capacity {
            return false;
        }
        self.advance(now);
        match &mut self.state {
            BucketState::TokenBucket { tokens, .. } => {
                if *tokens >= cost as f64 {
                    *tokens -= cost as f64;
                    true
                } else {
                    false
                }
            }
            BucketState::SlidingWindow { admitted, used } => {
                if *used + cost <= capacity {
                    admitted.push_back((now, cost));
                    *used += cost;
                    true
                } else {
                    false
                }
            }
            BucketState::FixedWindow { count, .. } => {
                if *count + cost <= capacity {
                    *count += cost;
                    true
                } else {
                    false
                }
            }
            BucketState::LeakyBucket { level, .. } => {
                if *level + cost as f64 <= capacity as f64 {
                    *level += cost as f64;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Time until `cost` would be admitted; `None` if it never can be.
    pub fn wait_time(&self, cost: u64, now: Instant) -> Option<Duration> {
        let capacity = self.quota.capacity();
        if cost > capacity {
            return None;
        }
        let penalty = self.penalty_remaining(now).unwrap_or(Duration::ZERO);
        let quota = self.quota;
        let wait = match &self.state {
            BucketState::TokenBucket {
                tokens,
                last_refill,
            } => {
                let elapsed = now.saturating_duration_since(*last_refill).as_secs_f64();
                let current = (tokens + elapsed * quota.rate()).min(capacity as f64);
                let missing = cost as f64 - current;
                if missing <= 0.0 {
                    Duration::ZERO
                } else {
                    Duration::from_secs_f64(missing / quota.rate())
                }
            }
            BucketState::SlidingWindow { admitted, used } => {
                let mut live: u64 = *used;
                let mut wait = Duration::ZERO;
                for (at, c) in admitted.iter() {
                    let expires = *at + quota.window;
                    if expires <= now {
                        live -= c;
                        continue;
                    }
                    if live + cost <= capacity {
                        break;
                    }
                    live -= c;
                    wait = expires - now;
                }
                wait
            }
            BucketState::FixedWindow {
                window_start,
                count,
            } => {
                let window_end = *window_start + quota.window;
                if now >= window_end || *count + cost <= capacity {
                    Duration::ZERO
                } else {
                    window_end - now
                }
            }
            BucketState::LeakyBucket { level, last_leak } => {
                let elapsed = now.saturating_duration_since(*last_leak).as_secs_f64();
                let current = (level - elapsed * quota.rate()).max(0.0);
                let overflow = current + cost as f64 - capacity as f64;
                if overflow <= 0.0 {
                    Duration::ZERO
                } else {
                    Duration::from_secs_f64(overflow / quota.rate())
                }
            }
        };
        Some(wait.max(penalty))
    }

    /// Best-effort remaining capacity at `now`.
    pub fn remaining(&self, now: Instant) -> u64 {
        if self.penalty_remaining(now).is_some() {
            return 0;
        }
        let quota = self.quota;
        let capacity = quota.capacity();
        match &self.state {
            BucketState::TokenBucket {
                tokens,
                last_refill,
            } => {
                let elapsed = now.saturating_duration_since(*last_refill).as_secs_f64();
                (tokens + elapsed * quota.rate()).min(capacity as f64).floor() as u64
            }
            BucketState::SlidingWindow { admitted, .. } => {
                let live: u64 = admitted
                    .iter()
                    .filter(|(at, _)| *at + quota.window > now)
                    .map(|(_, c)| *c)
                    .sum();
                capacity.saturating_sub(live)
            }
            BucketState::FixedWindow {
                window_start,
                count,
            } => {
                if now >= *window_start + quota.window {
                    capacity
                } else {
                    capacity.saturating_sub(*count)
                }
            }
            BucketState::LeakyBucket { level, last_leak } => {
                let elapsed = now.saturating_duration_since(*last_leak).as_secs_f64();
                let current = (level - elapsed * quota.rate()).max(0.0);
                (capacity as f64 - current).max(0.0).floor() as u64
            }
        }
    }

    /// Apply refill / expiry / drain up to `now`.
    fn advance(&mut self, now: Instant) {
        let quota = self.quota;
        match &mut self.state {
            BucketState::TokenBucket {
                tokens,
                last_refill,
            } => {
                let elapsed = now.saturating_duration_since(*last_refill).as_secs_f64();
                *tokens = (*tokens + elapsed * quota.rate()).min(quota.capacity() as f64);
                *last_refill = now;
            }
            BucketState::SlidingWindow { admitted, used } => {
                while let Some((at, c)) = admitted.front() {
                    if *at + quota.window <= now {
                        *used -= *c;
                        admitted.pop_front();
                    } else {
                        break;
                    }
                }
            }
            BucketState::FixedWindow {
                window_start,
                count,
            } => {
                if now >= *window_start + quota.window {
                    *window_start = now;
                    *count = 0;
                }
            }
            BucketState::LeakyBucket { level, last_leak } => {
                let elapsed = now.saturating_duration_since(*last_leak).as_secs_f64();
                *level = (*level - elapsed * quota.rate()).max(0.0);
                *last_leak = now;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [RateLimitAlgorithm; 4] = [
        RateLimitAlgorithm::TokenBucket,
        RateLimitAlgorithm::SlidingWindow,
        RateLimitAlgorithm::FixedWindow,
        RateLimitAlgorithm::LeakyBucket,
    ];

    #[test]
    fn test_quota_scenario_all_algorithms() {
        let quota = Quota::new(5, Duration::from_secs(60));
        for algorithm in ALL {
            let start = Instant::now();
            let mut bucket = Bucket::new(algorithm, quota, start);
            for i in 0..5 {
                assert!(bucket.try_acquire(1, start), "{algorithm} call {i}");
            }
            assert!(!bucket.try_acquire(1, start), "{algorithm} sixth call");
            assert!(
                bucket.try_acquire(1, start + Duration::from_secs(61)),
                "{algorithm} after window"
            );
        }
    }

    #[test]
    fn test_wait_time_does_not_consume() {
        let quota = Quota::new(2, Duration::from_secs(10));
        for algorithm in ALL {
            let start = Instant::now();
            let mut bucket = Bucket::new(algorithm, quota, start);
            assert_eq!(bucket.wait_time(1, start), Some(Duration::ZERO));
            assert!(bucket.try_acquire(1, start));
            assert!(bucket.try_acquire(1, start));

            let wait = bucket.wait_time(1, start).unwrap();
            assert!(wait > Duration::ZERO, "{algorithm}");
            assert!(wait <= Duration::from_secs(10), "{algorithm}");
            assert_eq!(bucket.remaining(start), 0);

            assert!(bucket.try_acquire(1, start + wait), "{algorithm} at wait {wait:?}");
        }
    }

    #[test]
    fn test_sliding_window_rolls() {
        let start = Instant::now();
        let mut bucket = Bucket::new(
            RateLimitAlgorithm::SlidingWindow,
            Quota::new(3, Duration::from_secs(60)),
            start,
        );
        assert!(bucket.try_acquire(1, start));
        assert!(bucket.try_acquire(1, start + Duration::from_secs(20)));
        assert!(bucket.try_acquire(1, start + Duration::from_secs(40)));
        assert!(!bucket.try_acquire(1, start + Duration::from_secs(59)));

        // The first admission has left the window; the others are still in it.
        let t = start + Duration::from_secs(60);
        assert_eq!(bucket.remaining(t), 1);
        assert!(bucket.try_acquire(1, t));
        assert!(!bucket.try_acquire(1, t));
        assert_eq!(
            bucket.wait_time(1, t),
            Some(Duration::from_secs(20))
        );
    }

    #[test]
    fn test_burst_allowance() {
        let start = Instant::now();
        let quota = Quota::new(2, Duration::from_secs(60)).with_burst(1);
        let mut bucket = Bucket::new(RateLimitAlgorithm::FixedWindow, quota, start);
        assert!(bucket.try_acquire(3, start));
        assert!(!bucket.try_acquire(1, start));
        assert_eq!(bucket.wait_time(4, start), None);
    }

    #[test]
    fn test_penalty_blocks_until_expired() {
        let start = Instant::now();
        let mut bucket = Bucket::new(
            RateLimitAlgorithm::TokenBucket,
            Quota::new(10, Duration::from_secs(1)),
            start,
        );
        bucket.penalize(start + Duration::from_secs(5));
        assert!(!bucket.try_acquire(1, start));
        assert_eq!(bucket.wait_time(1, start), Some(Duration::from_secs(5)));
        assert!(!bucket.is_idle(start + Duration::from_secs(3), Duration::from_secs(1)));
        assert!(bucket.try_acquire(1, start + Duration::from_secs(5)));
    }
}
