//! Round-robin instance selection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::backends::handle::BackendHandle;
use crate::backends::strategy::InstanceSelector;

/// Round-robin selector.
/// Stores an internal counter to rotate through instances.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InstanceSelector for RoundRobin {
    fn select(&self, instances: &[Arc<BackendHandle>]) -> Option<Arc<BackendHandle>> {
        if instances.is_empty() {
            return None;
        }

        let start_count = self.counter.fetch_add(1, Ordering::Relaxed);
        let len = instances.len();

        for i in 0..len {
            let index = (start_count + i) % len;
            let handle = &instances[index];
            if handle.is_selectable() {
                return Some(handle.clone());
            }
        }
        None
    }
}
