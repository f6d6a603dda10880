//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All guards produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters and gauges via `metrics`)
//!
//! Consumers:
//!     → stdout (pretty for development, JSON for production)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Log events carry field names, keys and decisions, never submitted values or secrets
//! - Metric updates are no-ops until a recorder is installed
//! - Request ID from the HTTP layer flows into the request span

pub mod logging;
pub mod metrics;
