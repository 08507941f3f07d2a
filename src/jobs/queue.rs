//! Priority job queue.
//!
//! # Responsibilities
//! - Hold pending jobs in four FIFO tiers (Urgent, High, Normal, Low)
//! - Track dispatched (in-flight) jobs and retire them into terminal history
//! - Wake idle workers without polling
//!
//! # Design Decisions
//! - One mutex guards pending tiers and the in-flight map together, so every
//!   move between the two (and into history) is atomic and a job is always in
//!   exactly one place
//! - Capacity applies to fresh submissions only; requeues always succeed
//! - Lock order: queue state, then history

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::jobs::history::TerminalHistory;
use crate::jobs::types::{Job, JobId, JobStatus, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("job queue is full ({capacity} pending)")]
pub struct QueueFull {
    pub capacity: usize,
}

#[derive(Default)]
struct QueueState {
    /// Indexed by `Priority::tier()`.
    tiers: [VecDeque<Job>; 4],
    in_flight: HashMap<JobId, Job>,
}

impl QueueState {
    fn pending_len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }
}

/// Counts taken under one lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub urgent: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub in_flight: usize,
    pub retrying: usize,
    pub terminal: usize,
}

/// Consistent point-in-time copy of the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Pending jobs in dequeue order.
    pub pending: Vec<Job>,
    pub in_flight: Vec<Job>,
    pub terminal: usize,
}

impl QueueSnapshot {
    /// Recount from the copied jobs.
    pub fn counts(&self) -> QueueCounts {
        let by = |p: Priority| self.pending.iter().filter(|j| j.priority == p).count();
        QueueCounts {
            pending: self.pending.len(),
            urgent: by(Priority::Urgent),
            high: by(Priority::High),
            normal: by(Priority::Normal),
            low: by(Priority::Low),
            in_flight: self.in_flight.len(),
            retrying: self
                .in_flight
                .iter()
                .filter(|j| j.status == JobStatus::Retrying)
                .count(),
            terminal: self.terminal,
        }
    }
}

pub struct JobQueue {
    state: Mutex<QueueState>,
    history: TerminalHistory,
    notify: Notify,
    max_pending: usize,
}

impl JobQueue {
    pub fn new(max_pending: usize, history_capacity: usize, history_max_age: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            history: TerminalHistory::new(history_capacity, history_max_age),
            notify: Notify::new(),
            max_pending: max_pending.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_pending
    }

    /// Insert at the tail of the job's tier.
    pub fn enqueue(&self, mut job: Job) -> Result<(), QueueFull> {
        {
            let mut state = self.state.lock();
            if state.pending_len() >= self.max_pending {
                return Err(QueueFull {
                    capacity: self.max_pending,
                });
            }
            job.transition(JobStatus::Queued);
            state.tiers[job.priority.tier()].push_back(job);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Take the head of the highest non-empty tier, marking it dispatched.
    pub fn try_dequeue(&self) -> Option<Job> {
        let mut state = self.state.lock();
        let mut job = state.tiers.iter_mut().find_map(VecDeque::pop_front)?;
        job.transition(JobStatus::Dispatching);
        state.in_flight.insert(job.id, job.clone());
        let more = state.pending_len() > 0;
        drop(state);
        if more {
            self.notify.notify_one();
        }
        Some(job)
    }

    /// Wait for a job; `None` once `stop` is cancelled.
    pub async fn dequeue(&self, stop: &CancellationToken) -> Option<Job> {
        loop {
            if stop.is_cancelled() {
                return None;
            }
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.try_dequeue() {
                return Some(job);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = stop.cancelled() => return None,
            }
        }
    }

    /// Put an in-flight job back into pending, bypassing capacity.
    ///
    /// `front` places it at the head of its tier.
    pub fn requeue(&self, id: &JobId, priority: Priority, front: bool) -> bool {
        {
            let mut state = self.state.lock();
            let Some(mut job) = state.in_flight.remove(id) else {
                return false;
            };
            job.priority = priority;
            job.transition(JobStatus::Queued);
            let tier = &mut state.tiers[priority.tier()];
            if front {
                tier.push_front(job);
            } else {
                tier.push_back(job);
            }
        }
        self.notify.notify_one();
        true
    }

    /// Remove a pending job, retiring it as Cancelled.
    ///
    /// `None` if the job is not pending (already dispatched, terminal or unknown).
    pub fn remove(&self, id: &JobId) -> Option<Job> {
        let mut state = self.state.lock();
        let (tier, pos) = state.tiers.iter().enumerate().find_map(|(t, q)| {
            q.iter().position(|j| j.id == *id).map(|p| (t, p))
        })?;
        let mut job = state.tiers[tier].remove(pos)?;
        job.transition(JobStatus::Cancelled);
        self.history.insert(job.clone(), Instant::now());
        Some(job)
    }

    /// Mutate an in-flight job in place.
    pub fn update_in_flight<R>(&self, id: &JobId, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        let mut state = self.state.lock();
        state.in_flight.get_mut(id).map(f)
    }

    /// Move an in-flight job into terminal history after applying `f`.
    pub fn retire(&self, id: &JobId, f: impl FnOnce(&mut Job)) -> Option<Job> {
        let mut state = self.state.lock();
        let mut job = state.in_flight.remove(id)?;
        f(&mut job);
        self.history.insert(job.clone(), Instant::now());
        Some(job)
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        let state = self.state.lock();
        if let Some(job) = state.in_flight.get(id) {
            return Some(job.clone());
        }
        if let Some(job) = state
            .tiers
            .iter()
            .flat_map(|tier| tier.iter())
            .find(|j| j.id == *id)
        {
            return Some(job.clone());
        }
        self.history.get(id)
    }

    pub fn is_in_flight(&self, id: &JobId) -> bool {
        self.state.lock().in_flight.contains_key(id)
    }

    pub fn in_flight_ids(&self) -> Vec<JobId> {
        self.state.lock().in_flight.keys().copied().collect()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock();
        QueueSnapshot {
            pending: state.tiers.iter().flat_map(|t| t.iter().cloned()).collect(),
            in_flight: state.in_flight.values().cloned().collect(),
            terminal: self.history.len(),
        }
    }

    pub fn counts(&self) -> QueueCounts {
        let state = self.state.lock();
        let tier = |p: Priority| state.tiers[p.tier()].len();
        QueueCounts {
            pending: state.pending_len(),
            urgent: tier(Priority::Urgent),
            high: tier(Priority::High),
            normal: tier(Priority::Normal),
            low: tier(Priority::Low),
            in_flight: state.in_flight.len(),
            retrying: state
                .in_flight
                .values()
                .filter(|j| j.status == JobStatus::Retrying)
                .count(),
            terminal: self.history.len(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending_len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Recently finished jobs, newest first.
    pub fn recent_terminal(&self, limit: usize) -> Vec<Job> {
        self.history.recent(limit)
    }

    /// Age out terminal history; returns the number evicted.
    pub fn evict_history(&self) -> usize {
        let _state = self.state.lock();
        self.history.evict_expired(Instant::now())
    }
}
