//! API entry pipeline for the tours service.
//!
//! Every request passes a fixed sequence of stages (security headers, a
//! per-IP rate limit on `/api`, body ingestion, input sanitization) before a
//! resource router sees it. Unmatched paths become 404s and every failure is
//! rendered by a single error conversion stage.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod routing;
pub mod security;

pub use config::schema::AppConfig;
pub use error::{AppError, AppResult};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use pipeline::{Pipeline, PipelineBuilder};
pub use routing::Collaborators;
