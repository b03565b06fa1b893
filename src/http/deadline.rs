//! Optional request deadline.
//!
//! Installed only when `timeouts.request_secs` is configured. An expired
//! deadline becomes an operational 408 for the error conversion stage.

use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::error::{AppError, AppResult};

pub async fn enforce_deadline(
    State(deadline): State<Duration>,
    request: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let path = request.uri().path().to_string();
    match tokio::time::timeout(deadline, next.run(request)).await {
        Ok(response) => Ok(response),
        Err(_) => {
            tracing::warn!(path = %path, deadline = ?deadline, "Request deadline exceeded");
            Err(AppError::new("Request timed out", StatusCode::REQUEST_TIMEOUT).with_origin("deadline"))
        }
    }
}
