//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//!     → snapshot.rs (JSON stats for the admin API and CLI)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Job IDs and backend names are log fields, never interpolated text
//! - Metrics are cheap (atomic increments behind the `metrics` facade)

pub mod logging;
pub mod metrics;
pub mod snapshot;
