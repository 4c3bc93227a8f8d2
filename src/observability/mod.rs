//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON lines)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Admin API snapshots and event stream (see `admin`)
//! ```
//!
//! # Design Decisions
//! - Every event carries the command, pool or collapser key as a field
//! - State transitions log at info/warn, per-call detail at debug/trace
//! - Metrics are cheap (atomic increments) and optional

pub mod logging;
pub mod metrics;
