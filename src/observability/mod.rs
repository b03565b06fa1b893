//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All stages produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout (pretty in development, JSON in production)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields, never interpolated strings, for machine parsing
//! - Request ID flows through every stage via the x-request-id header
//! - Metric updates are cheap and safe to call with no recorder installed

pub mod logging;
pub mod metrics;
