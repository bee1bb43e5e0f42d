//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! broker + relay + http produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (fmt layer, filtered by RUST_LOG or config)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Request ID flows from the inbound request into spans and upstream headers
//! - Metric updates are no-ops until an exporter is installed

pub mod logging;
pub mod metrics;
