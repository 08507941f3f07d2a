//! Bounded history of terminal jobs.
//!
//! Entries are partitioned by job id in a `DashMap`; a separate FIFO of ids
//! keeps retirement order so eviction is oldest-first, both by count and by age.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::jobs::types::{Job, JobId};

struct TerminalEntry {
    job: Job,
    retired_at: Instant,
}

pub struct TerminalHistory {
    entries: DashMap<JobId, TerminalEntry>,
    order: Mutex<VecDeque<JobId>>,
    capacity: usize,
    max_age: Duration,
}

impl TerminalHistory {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            max_age,
        }
    }

    pub fn insert(&self, job: Job, now: Instant) {
        let id = job.id;
        let mut order = self.order.lock();
        if self
            .entries
            .insert(id, TerminalEntry { job, retired_at: now })
            .is_none()
        {
            order.push_back(id);
        }
        while order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                self.entries.remove(&oldest);
                tracing::trace!(job_id = %oldest, "Evicted terminal job (capacity)");
            }
        }
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.entries.get(id).map(|entry| entry.job.clone())
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recently retired jobs, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Job> {
        let order = self.order.lock();
        order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| self.entries.get(id).map(|e| e.job.clone()))
            .collect()
    }

    /// Drop entries older than the configured max age.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let mut order = self.order.lock();
        let mut evicted = 0;
        while let Some(oldest) = order.front().copied() {
            let expired = self
                .entries
                .get(&oldest)
                .map_or(true, |e| now.saturating_duration_since(e.retired_at) >= self.max_age);
            if !expired {
                break;
            }
            order.pop_front();
            self.entries.remove(&oldest);
            evicted += 1;
        }
        evicted
    }
}
