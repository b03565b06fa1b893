//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (hardening headers on the way out)
//!     → rate_limit.rs (per-IP fixed window, API paths only)
//!     → [body ingestion]
//!     → sanitize.rs (operator keys, then markup)
//!     → pollution.rs (collapse repeated parameters)
//!     → Pass to routing
//! ```
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - Sanitizers degrade input silently; only the rate limiter rejects
//! - No trust in client input

pub mod headers;
pub mod pollution;
pub mod rate_limit;
pub mod sanitize;

pub use pollution::ParameterPollution;
pub use rate_limit::{Clock, InMemoryStore, ManualClock, RateLimitStore, RateLimiter, SystemClock};
