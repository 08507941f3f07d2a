//! Instance selection strategies.
//!
//! Every strategy sees the full instance list of one backend and must skip
//! instances that are not selectable (disabled or failed).

use std::sync::Arc;

use crate::backends::handle::{BackendHandle, BackendStatus};
use crate::backends::least_loaded::LeastLoaded;
use crate::backends::round_robin::RoundRobin;
use crate::config::SelectionStrategy;

/// Picks one instance among interchangeable ones.
pub trait InstanceSelector: Send + Sync + std::fmt::Debug {
    fn select(&self, instances: &[Arc<BackendHandle>]) -> Option<Arc<BackendHandle>>;
}

/// Lowest priority value first; ties keep registration order.
#[derive(Debug, Default)]
pub struct ByPriority;

impl InstanceSelector for ByPriority {
    fn select(&self, instances: &[Arc<BackendHandle>]) -> Option<Arc<BackendHandle>> {
        instances
            .iter()
            .filter(|h| h.is_selectable())
            .min_by_key(|h| h.priority())
            .cloned()
    }
}

/// Uniformly random among selectable instances.
#[derive(Debug, Default)]
pub struct RandomPick;

impl InstanceSelector for RandomPick {
    fn select(&self, instances: &[Arc<BackendHandle>]) -> Option<Arc<BackendHandle>> {
        let candidates: Vec<&Arc<BackendHandle>> =
            instances.iter().filter(|h| h.is_selectable()).collect();
        if candidates.is_empty() {
            return None;
        }
        Some(candidates[fastrand::usize(..candidates.len())].clone())
    }
}

/// Healthy before Degraded, then least loaded, then lowest priority value.
#[derive(Debug, Default)]
pub struct HealthAware;

impl InstanceSelector for HealthAware {
    fn select(&self, instances: &[Arc<BackendHandle>]) -> Option<Arc<BackendHandle>> {
        instances
            .iter()
            .filter(|h| h.is_selectable())
            .min_by_key(|h| {
                let rank = match h.status() {
                    BackendStatus::Healthy => 0,
                    _ => 1,
                };
                (rank, h.load(), h.priority())
            })
            .cloned()
    }
}

/// Apply `strategy`; `round_robin` carries the backend's rotation state.
pub fn select_with(
    strategy: SelectionStrategy,
    round_robin: &RoundRobin,
    instances: &[Arc<BackendHandle>],
) -> Option<Arc<BackendHandle>> {
    match strategy {
        SelectionStrategy::RoundRobin => round_robin.select(instances),
        SelectionStrategy::Priority => ByPriority.select(instances),
        SelectionStrategy::Random => RandomPick.select(instances),
        SelectionStrategy::LeastLoaded => LeastLoaded.select(instances),
        SelectionStrategy::HealthAware => HealthAware.select(instances),
    }
}
