//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! forward and reverse ends produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Session keys are logged by prefix only
//! - Metric updates are no-ops until an exporter is installed

pub mod logging;
pub mod metrics;
