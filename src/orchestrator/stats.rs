//! Orchestrator counters.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub retries: u64,
    pub rate_limited: u64,
    pub circuit_rejections: u64,
    pub timeouts: u64,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    /// Mean time from submission to first dispatch.
    pub avg_queue_ms: f64,
    /// Mean duration of an execution attempt.
    pub avg_processing_ms: f64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    retries: AtomicU64,
    rate_limited: AtomicU64,
    circuit_rejections: AtomicU64,
    timeouts: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    queue_ms_total: AtomicU64,
    queue_samples: AtomicU64,
    processing_ms_total: AtomicU64,
    processing_samples: AtomicU64,
}

impl Counters {
    pub(crate) fn submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn retried(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn circuit_rejected(&self) {
        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn timed_out(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the new in-flight count.
    pub(crate) fn attempt_started(&self) -> usize {
        let now = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::Relaxed);
        now
    }

    pub(crate) fn attempt_finished(&self, elapsed: Duration) -> usize {
        self.processing_ms_total
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        self.processing_samples.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::Relaxed).saturating_sub(1)
    }

    pub(crate) fn queue_wait(&self, waited: Duration) {
        self.queue_ms_total
            .fetch_add(waited.as_millis() as u64, Ordering::Relaxed);
        self.queue_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> OrchestratorStats {
        let mean = |total: &AtomicU64, samples: &AtomicU64| {
            let n = samples.load(Ordering::Relaxed);
            if n == 0 {
                0.0
            } else {
                total.load(Ordering::Relaxed) as f64 / n as f64
            }
        };
        OrchestratorStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::Relaxed),
            avg_queue_ms: mean(&self.queue_ms_total, &self.queue_samples),
            avg_processing_ms: mean(&self.processing_ms_total, &self.processing_samples),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_and_averages() {
        let c = Counters::default();
        assert_eq!(c.attempt_started(), 1);
        assert_eq!(c.attempt_started(), 2);
        assert_eq!(c.attempt_finished(Duration::from_millis(100)), 1);
        assert_eq!(c.attempt_finished(Duration::from_millis(300)), 0);
        c.queue_wait(Duration::from_millis(50));

        let s = c.snapshot();
        assert_eq!(s.in_flight, 0);
        assert_eq!(s.peak_in_flight, 2);
        assert_eq!(s.avg_processing_ms, 200.0);
        assert_eq!(s.avg_queue_ms, 50.0);
    }
}
