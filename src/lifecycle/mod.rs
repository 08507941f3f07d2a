//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Registry → Orchestrator → Health monitor
//!     → register adapters → start workers and probes → admin listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → stop dispatching → drain in-flight work → stop probes
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: stop accepting, drain, close
//! - Draining is bounded by the configured grace period

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
pub use startup::RetrievalCore;
