//! Least-loaded instance selection.

use std::sync::Arc;

use crate::backends::handle::BackendHandle;
use crate::backends::strategy::InstanceSelector;

/// Least loaded selector.
/// Selects the instance with the fewest in-flight calls.
#[derive(Debug, Default)]
pub struct LeastLoaded;

impl LeastLoaded {
    pub fn new() -> Self {
        Self
    }
}

impl InstanceSelector for LeastLoaded {
    fn select(&self, instances: &[Arc<BackendHandle>]) -> Option<Arc<BackendHandle>> {
        // In case of tie, the first one is selected (stability)
        instances
            .iter()
            .filter(|h| h.is_selectable())
            .min_by_key(|h| h.load())
            .cloned()
    }
}
