//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Tunnel server, tunnel client, payload codec produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout (fmt or JSON)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Payload hex dumps are only produced at TRACE level
//! - Metric updates go through the `metrics` facade; with no exporter
//!   installed they are no-ops

pub mod logging;
pub mod metrics;
