//! Terminal error conversion stage.
//!
//! Every failure raised by an inner stage or a router arrives here as a
//! response carrying an [`AppError`] extension. This stage classifies it,
//! renders a body for the configured environment, and sends exactly one
//! response. Nothing is forwarded further.

use std::any::Any;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::config::Environment;
use crate::error::AppError;
use crate::observability::metrics;
use crate::security::sanitize::escape_html;

const GENERIC_API_MESSAGE: &str = "Something went very wrong!";
const GENERIC_PAGE_MESSAGE: &str = "Please try again later.";
const PAGE_TITLE: &str = "Something went wrong!";

/// Renders failures according to environment and request surface.
#[derive(Debug, Clone)]
pub struct ErrorConverter {
    environment: Environment,
    api_prefix: String,
}

impl ErrorConverter {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            api_prefix: "/api".to_string(),
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    fn is_api(&self, path: &str) -> bool {
        path.starts_with(&self.api_prefix)
    }

    /// Produce the final response for `err` raised while serving `path`.
    pub fn render(&self, err: &AppError, path: &str) -> Response {
        if err.is_operational() {
            tracing::debug!(path = %path, status = %err.status(), message = %err.message(), "Operational error");
        } else {
            tracing::error!(
                path = %path,
                message = %err.message(),
                detail = err.detail().unwrap_or_default(),
                origin = err.origin().unwrap_or("unknown"),
                "Unhandled defect"
            );
        }
        metrics::record_error(err.is_operational(), err.status().as_u16());

        let api = self.is_api(path);
        match self.environment {
            Environment::Development => self.render_development(err, api),
            Environment::Production => self.render_production(err, api),
        }
    }

    fn render_development(&self, err: &AppError, api: bool) -> Response {
        if api {
            let body = json!({
                "status": err.status_label(),
                "error": {
                    "statusCode": err.status().as_u16(),
                    "isOperational": err.is_operational(),
                    "origin": err.origin(),
                },
                "message": err.message(),
                "stack": err.detail(),
            });
            (err.status(), Json(body)).into_response()
        } else {
            (err.status(), error_page(err.message())).into_response()
        }
    }

    fn render_production(&self, err: &AppError, api: bool) -> Response {
        match (api, err.is_operational()) {
            (true, true) => {
                let body = json!({ "status": err.status_label(), "message": err.message() });
                (err.status(), Json(body)).into_response()
            }
            (true, false) => {
                let body = json!({ "status": "error", "message": GENERIC_API_MESSAGE });
                (err.status(), Json(body)).into_response()
            }
            (false, true) => (err.status(), error_page(err.message())).into_response(),
            (false, false) => (err.status(), error_page(GENERIC_PAGE_MESSAGE)).into_response(),
        }
    }
}

fn error_page(message: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body><div class=\"error\"><h2 class=\"error__title\">{title}</h2>\
         <div class=\"error__msg\">{msg}</div></div></body></html>",
        title = PAGE_TITLE,
        msg = escape_html(message),
    ))
}

/// Middleware: the guaranteed end of the error path.
pub async fn convert_errors(
    State(converter): State<Arc<ErrorConverter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let response = next.run(request).await;

    let Some(err) = response.extensions().get::<AppError>().cloned() else {
        return response;
    };

    let mut rendered = converter.render(&err, &path);
    // Keep headers set by earlier stages (security, rate limit, request id)
    // but never the placeholder's body framing.
    for (name, value) in response.headers() {
        if name == header::CONTENT_TYPE
            || name == header::CONTENT_LENGTH
            || name == header::CONTENT_ENCODING
        {
            continue;
        }
        rendered.headers_mut().append(name.clone(), value.clone());
    }
    rendered
}

/// `CatchPanicLayer` handler: a panic anywhere inside the pipeline is a defect.
pub fn panic_to_defect(payload: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "panic with non-string payload".to_string()
    };

    let mut response = AppError::defect(format!("panic: {}", message))
        .with_origin("panic")
        .into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use serde_json::Value;

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_development_discloses_defect() {
        let converter = ErrorConverter::new(Environment::Development);
        let err = AppError::defect("database exploded").with_origin("tours");
        let response = converter.render(&err, "/api/v1/tours");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "database exploded");
        assert_eq!(body["error"]["origin"], "tours");
        assert_eq!(body["error"]["isOperational"], false);
        assert!(body["stack"].as_str().unwrap().contains("database exploded"));
    }

    #[tokio::test]
    async fn test_production_hides_defect() {
        let converter = ErrorConverter::new(Environment::Production);
        let err = AppError::defect("database exploded");
        let response = converter.render(&err, "/api/v1/tours");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body, json!({ "status": "error", "message": GENERIC_API_MESSAGE }));
    }

    #[tokio::test]
    async fn test_production_discloses_operational() {
        let converter = ErrorConverter::new(Environment::Production);
        let response = converter.render(&AppError::not_found("/api/nope"), "/api/nope");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(
            body,
            json!({ "status": "fail", "message": "Can't find /api/nope on this server!" })
        );
    }

    #[tokio::test]
    async fn test_pages_for_non_api_paths() {
        let converter = ErrorConverter::new(Environment::Production);
        let response = converter.render(&AppError::defect("secret internals"), "/me");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let html = body_text(response).await;
        assert!(html.contains(PAGE_TITLE));
        assert!(html.contains(GENERIC_PAGE_MESSAGE));
        assert!(!html.contains("secret internals"));

        let response = converter.render(&AppError::not_found("/<b>"), "/<b>");
        let html = body_text(response).await;
        assert!(html.contains("Can&#x27;t find /&lt;b&gt; on this server!"));
    }

    #[test]
    fn test_panic_payloads() {
        let response = panic_to_defect(Box::new("kaboom"));
        let err = response.extensions().get::<AppError>().unwrap();
        assert!(!err.is_operational());
        assert_eq!(err.message(), "panic: kaboom");

        let response = panic_to_defect(Box::new(String::from("owned kaboom")));
        let err = response.extensions().get::<AppError>().unwrap();
        assert_eq!(err.message(), "panic: owned kaboom");
    }
}
