//! Error model.
//!
//! # Data Flow
//! ```text
//! Any stage or router detects a failure
//!     → AppError (operational or defect)
//!     → IntoResponse: placeholder response carrying the AppError
//!     → convert.rs (terminal stage renders the final body)
//! ```
//!
//! # Design Decisions
//! - Stages and routers raise errors, they never format error bodies
//! - The safe-to-disclose flag travels with the error
//! - Panics are defects, caught and converted like any other failure

pub mod convert;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub use convert::{convert_errors, panic_to_defect, ErrorConverter};

/// Result alias used by stages and collaborators.
pub type AppResult<T> = Result<T, AppError>;

/// A failure on its way to the error conversion stage.
///
/// Operational errors are expected (not found, rate limited, bad input) and
/// their message is always safe to show. Defects are everything else.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct AppError {
    message: String,
    status: StatusCode,
    is_operational: bool,
    detail: Option<String>,
    origin: Option<String>,
}

impl AppError {
    /// An operational error with the given client-facing message.
    pub fn new(message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            message: message.into(),
            status,
            is_operational: true,
            detail: None,
            origin: None,
        }
    }

    /// Wrap an unexpected failure. Always 500, never disclosed in production.
    pub fn defect<E>(err: E) -> Self
    where
        E: std::fmt::Display + std::fmt::Debug,
    {
        Self {
            message: err.to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            is_operational: false,
            detail: Some(format!("{:?}", err)),
            origin: None,
        }
    }

    pub fn not_found(original_url: &str) -> Self {
        Self::new(
            format!("Can't find {} on this server!", original_url),
            StatusCode::NOT_FOUND,
        )
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::TOO_MANY_REQUESTS)
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::new(
            format!("Request entity too large (limit {} bytes)", limit),
            StatusCode::PAYLOAD_TOO_LARGE,
        )
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::BAD_REQUEST)
    }

    /// Record which stage or router raised the error.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Set the origin only if no inner stage recorded one.
    pub fn or_origin(mut self, origin: impl Into<String>) -> Self {
        if self.origin.is_none() {
            self.origin = Some(origin.into());
        }
        self
    }

    /// Attach diagnostic detail shown in development only.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_operational(&self) -> bool {
        self.is_operational
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// "fail" for operational client errors, "error" for everything else.
    pub fn status_label(&self) -> &'static str {
        if self.is_operational && self.status.is_client_error() {
            "fail"
        } else {
            "error"
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::defect(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::defect(err)
    }
}

impl IntoResponse for AppError {
    /// The body here is a placeholder; `convert_errors` replaces it.
    fn into_response(self) -> Response {
        let mut response = (self.status, self.message.clone()).into_response();
        response.extensions_mut().insert(self);
        response
    }
}
