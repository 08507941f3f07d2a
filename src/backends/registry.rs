//! Backend registry.
//!
//! # Responsibilities
//! - Register and unregister backend adapters (explicitly, from the composition root)
//! - Own one circuit breaker per backend and one health record per instance
//! - Resolve a target to a healthy, capable backend instance
//! - Forward call outcomes to the breaker and release load
//!
//! # Design Decisions
//! - The entry list is an `ArcSwap` snapshot sorted by priority (lower value
//!   first, then registration order); writers serialize on a mutex and
//!   publish a new snapshot, readers never block
//! - Adapters with the same name are interchangeable instances of one backend
//!   and share its breaker
//! - Absence of a match is a normal `None`, never an error

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::backends::cache::{CacheStats, TargetCache};
use crate::backends::handle::{BackendCall, BackendHandle, BackendStatus, CallOutcome};
use crate::backends::round_robin::RoundRobin;
use crate::backends::strategy::select_with;
use crate::backends::Backend;
use crate::config::schema::default_priority;
use crate::config::{CircuitBreakerConfig, CoreConfig, HealthCheckConfig, RegistryConfig, SelectionStrategy};
use crate::health::state::HealthRecord;
use crate::resilience::{BreakerSnapshot, CircuitBreaker};

/// Registration options for one adapter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendOptions {
    /// Selection priority, lower value preferred.
    pub priority: u32,
    pub enabled: bool,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            priority: default_priority(),
            enabled: true,
        }
    }
}

#[derive(Debug)]
struct BackendEntry {
    name: String,
    priority: u32,
    seq: u64,
    breaker: Arc<CircuitBreaker>,
    round_robin: Arc<RoundRobin>,
    instances: Vec<Arc<BackendHandle>>,
}

impl BackendEntry {
    fn adapter(&self) -> Option<&Arc<dyn Backend>> {
        self.instances.first().map(|h| h.adapter())
    }

    fn has_selectable(&self) -> bool {
        self.instances.iter().any(|h| h.is_selectable())
    }

    fn has_enabled(&self) -> bool {
        self.instances.iter().any(|h| h.is_enabled())
    }
}

/// Per-instance statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendStats {
    pub name: String,
    pub instance: String,
    pub priority: u32,
    pub enabled: bool,
    pub status: BackendStatus,
    pub load: usize,
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub breaker: BreakerSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub backends: Vec<BackendStats>,
    pub cache: CacheStats,
}

pub struct BackendRegistry {
    entries: ArcSwap<Vec<Arc<BackendEntry>>>,
    next_seq: Mutex<u64>,
    strategy: SelectionStrategy,
    breaker_config: CircuitBreakerConfig,
    health_config: HealthCheckConfig,
    cache: TargetCache,
}

impl BackendRegistry {
    pub fn new(
        registry: &RegistryConfig,
        breaker: &CircuitBreakerConfig,
        health: &HealthCheckConfig,
    ) -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
            next_seq: Mutex::new(0),
            strategy: registry.strategy,
            breaker_config: breaker.clone(),
            health_config: health.clone(),
            cache: TargetCache::new(registry.target_cache_ttl(), registry.target_cache_capacity),
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(&config.registry, &config.circuit_breaker, &config.health_check)
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    pub fn register(&self, adapter: Arc<dyn Backend>) -> Arc<BackendHandle> {
        self.register_with(adapter, BackendOptions::default())
    }

    /// Register an adapter; a second adapter with the same name becomes another
    /// instance of that backend.
    pub fn register_with(
        &self,
        adapter: Arc<dyn Backend>,
        options: BackendOptions,
    ) -> Arc<BackendHandle> {
        let name = adapter.name().to_string();
        let mut seq = self.next_seq.lock();
        let current = self.entries.load_full();
        let mut entries: Vec<Arc<BackendEntry>> = current.as_ref().clone();

        let existing = entries.iter().position(|e| e.name == name);
        let (breaker, round_robin, mut instances, priority, entry_seq) = match existing {
            Some(pos) => {
                let entry = entries.remove(pos);
                (
                    entry.breaker.clone(),
                    entry.round_robin.clone(),
                    entry.instances.clone(),
                    entry.priority,
                    entry.seq,
                )
            }
            None => {
                *seq += 1;
                (
                    Arc::new(CircuitBreaker::new(name.clone(), &self.breaker_config)),
                    Arc::new(RoundRobin::new()),
                    Vec::new(),
                    options.priority,
                    *seq,
                )
            }
        };

        let handle = Arc::new(BackendHandle::new(
            format!("{}#{}", name, instances.len()),
            options.priority,
            options.enabled,
            adapter,
            breaker.clone(),
            HealthRecord::new(&self.health_config),
        ));
        instances.push(handle.clone());

        entries.push(Arc::new(BackendEntry {
            name: name.clone(),
            priority,
            seq: entry_seq,
            breaker,
            round_robin,
            instances,
        }));
        entries.sort_by_key(|e| (e.priority, e.seq));
        self.entries.store(Arc::new(entries));
        drop(seq);

        tracing::info!(
            backend = %name,
            instance = %handle.instance(),
            priority = options.priority,
            enabled = options.enabled,
            "Backend registered"
        );
        handle
    }

    /// Remove a backend with all its instances, breaker and health records.
    pub fn unregister(&self, name: &str) -> bool {
        let _seq = self.next_seq.lock();
        let current = self.entries.load_full();
        if !current.iter().any(|e| e.name == name) {
            return false;
        }
        let entries: Vec<Arc<BackendEntry>> = current
            .iter()
            .filter(|e| e.name != name)
            .cloned()
            .collect();
        self.entries.store(Arc::new(entries));
        self.cache.invalidate_backend(name);
        tracing::info!(backend = %name, "Backend unregistered");
        true
    }

    /// Resolve `target` to an instance of the first backend, in priority order,
    /// that is selectable, has an available breaker and accepts the target.
    pub fn select_for(&self, target: &str) -> Option<Arc<BackendHandle>> {
        let entries = self.entries.load();

        if let Some(name) = self.cache.get(target) {
            if let Some(handle) = entries
                .iter()
                .find(|e| e.name == name)
                .and_then(|entry| self.pick(entry))
            {
                return Some(handle);
            }
        }

        for entry in entries.iter() {
            if !entry.has_selectable() || !entry.breaker.is_available() {
                continue;
            }
            let capable = entry.adapter().is_some_and(|a| a.can_handle(target));
            if !capable {
                continue;
            }
            if let Some(handle) = self.pick(entry) {
                self.cache.insert(target, &entry.name);
                tracing::debug!(target = %target, backend = %entry.name, instance = %handle.instance(), "Backend selected");
                return Some(handle);
            }
        }

        tracing::debug!(target = %target, "No backend available for target");
        None
    }

    /// Name of an enabled backend able to serve `target`, ignoring health and breakers.
    pub fn find_capable(&self, target: &str) -> Option<String> {
        self.entries
            .load()
            .iter()
            .find(|e| e.has_enabled() && e.adapter().is_some_and(|a| a.can_handle(target)))
            .map(|e| e.name.clone())
    }

    /// Choose among the instances of `name` with an explicit strategy.
    pub fn select_instance(
        &self,
        name: &str,
        strategy: SelectionStrategy,
    ) -> Option<Arc<BackendHandle>> {
        let entries = self.entries.load();
        let entry = entries.iter().find(|e| e.name == name)?;
        select_with(strategy, &entry.round_robin, &entry.instances)
    }

    /// Forward a call outcome to the backend's breaker and release its load.
    pub fn report_outcome(&self, call: BackendCall, outcome: CallOutcome) {
        call.record(outcome);
        tracing::debug!(
            backend = %call.name(),
            instance = %call.instance(),
            outcome = ?outcome,
            breaker = call.breaker().state().as_str(),
            "Call outcome recorded"
        );
    }

    /// Enable or disable every instance of `name`.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let entries = self.entries.load();
        let Some(entry) = entries.iter().find(|e| e.name == name) else {
            return false;
        };
        for handle in &entry.instances {
            handle.set_enabled(enabled);
        }
        if !enabled {
            self.cache.invalidate_backend(name);
        }
        tracing::info!(backend = %name, enabled, "Backend enabled flag changed");
        true
    }

    /// Set the status of every enabled instance of `name`.
    pub fn set_status(&self, name: &str, status: BackendStatus) -> bool {
        let entries = self.entries.load();
        let Some(entry) = entries.iter().find(|e| e.name == name) else {
            return false;
        };
        let mut changed = false;
        for handle in &entry.instances {
            changed |= handle.set_status(status);
        }
        changed
    }

    pub fn instances(&self, name: &str) -> Vec<Arc<BackendHandle>> {
        self.entries
            .load()
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.instances.clone())
            .unwrap_or_default()
    }

    /// Every registered instance, in priority order.
    pub fn handles(&self) -> Vec<Arc<BackendHandle>> {
        self.entries
            .load()
            .iter()
            .flat_map(|e| e.instances.iter().cloned())
            .collect()
    }

    pub fn breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.entries
            .load()
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.breaker.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.load().iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evict_cache(&self) -> usize {
        self.cache.evict_expired()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn stats(&self) -> RegistryStats {
        let backends = self
            .handles()
            .iter()
            .map(|h| {
                let (calls, successes, failures) = h.counters();
                BackendStats {
                    name: h.name().to_string(),
                    instance: h.instance().to_string(),
                    priority: h.priority(),
                    enabled: h.is_enabled(),
                    status: h.status(),
                    load: h.load(),
                    calls,
                    successes,
                    failures,
                    breaker: h.breaker().snapshot(),
                }
            })
            .collect();
        RegistryStats {
            backends,
            cache: self.cache.stats(),
        }
    }

    fn pick(&self, entry: &BackendEntry) -> Option<Arc<BackendHandle>> {
        if !entry.breaker.is_available() {
            return None;
        }
        select_with(self.strategy, &entry.round_robin, &entry.instances)
    }
}
