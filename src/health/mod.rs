//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each enabled backend instance
//!     → Update state.rs (history, alerts, derived status)
//!     → Feed the backend's circuit breaker
//!     → Publish alert changes
//!
//! State machine (state.rs):
//!     Healthy ←→ Degraded ←→ Failed
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - Probes and live traffic share one breaker per backend
//! - State transitions require consecutive successes/failures
//! - Health state is per instance; Disabled is owned by the operator, never by probes

pub mod active;
pub mod state;

pub use active::{AlertEvent, BackendHealth, HealthMonitor, ProbeReport};
pub use state::{Alert, AlertChange, AlertKind, HealthRecord, HealthSummary, Severity};
