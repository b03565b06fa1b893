//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum serve, connect info, graceful shutdown)
//!     → context.rs (request id, arrival time, client IP, parsed query)
//!     → cors.rs (permissive CORS, OPTIONS answered with 204)
//!     → body.rs (raw webhook bytes or size-capped structured body)
//!     → deadline.rs (optional per-request deadline)
//!     → [security stages, then routing]
//! ```

pub mod body;
pub mod context;
pub mod cors;
pub mod deadline;
pub mod params;
pub mod server;

pub use body::{BodyIngestion, WebhookRule};
pub use context::{RequestBody, RequestContext};
pub use server::HttpServer;
