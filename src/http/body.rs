//! Body ingestion stage.
//!
//! # Responsibilities
//! - Preserve the webhook endpoint's body verbatim (raw rule)
//! - Decode JSON and url-encoded bodies everywhere else (structured rule)
//! - Enforce per-parser size limits with a 413 before any router runs
//!
//! # Design Decisions
//! - The raw and structured rules are separate stages; the raw one runs
//!   first, and the structured one never parses the webhook endpoint
//! - Limits checked against Content-Length first (early rejection), then
//!   enforced while reading for bodies without a declared length
//! - Bodies of media types no parser claims are left untouched for routers

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, request::Parts, HeaderMap, Method, Request},
    middleware::Next,
    response::Response,
};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde_json::Value;

use crate::config::BodyConfig;
use crate::error::{AppError, AppResult};
use crate::http::context::{RequestBody, RequestContext};
use crate::http::params::parse_params;

pub const JSON: &str = "application/json";
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// The single endpoint whose body must stay unparsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRule {
    pub path: String,
    pub content_type: String,
}

impl WebhookRule {
    pub fn matches(&self, method: &Method, path: &str) -> bool {
        *method == Method::POST && path == self.path
    }
}

#[derive(Debug, Clone)]
pub struct BodyIngestion {
    webhook: WebhookRule,
    json_limit: usize,
    urlencoded_limit: usize,
    raw_limit: usize,
}

impl BodyIngestion {
    pub fn new(config: &BodyConfig) -> Self {
        Self {
            webhook: WebhookRule {
                path: config.webhook_path.clone(),
                content_type: config.webhook_content_type.to_ascii_lowercase(),
            },
            json_limit: config.json_limit,
            urlencoded_limit: config.urlencoded_limit,
            raw_limit: config.raw_limit,
        }
    }

    pub fn webhook(&self) -> &WebhookRule {
        &self.webhook
    }

    /// Consume the body according to the first rule that claims it.
    ///
    /// Returns the ingested body and, when no rule claimed it, the untouched
    /// stream.
    pub async fn ingest(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        body: Body,
    ) -> AppResult<(RequestBody, Option<Body>)> {
        match self.ingest_raw(method, path, headers, body).await? {
            (raw, None) => Ok((raw, None)),
            (_, Some(body)) => self.ingest_structured(method, path, headers, body).await,
        }
    }

    /// Raw rule: the webhook endpoint with its declared media type.
    pub async fn ingest_raw(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        body: Body,
    ) -> AppResult<(RequestBody, Option<Body>)> {
        let claimed = self.webhook.matches(method, path)
            && media_type(headers).as_deref() == Some(self.webhook.content_type.as_str());
        if !claimed {
            return Ok((RequestBody::Empty, Some(body)));
        }
        let bytes = read_limited(headers, body, self.raw_limit).await?;
        Ok((RequestBody::Raw(bytes), None))
    }

    /// Structured rule: JSON and url-encoded bodies off the webhook endpoint.
    pub async fn ingest_structured(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        body: Body,
    ) -> AppResult<(RequestBody, Option<Body>)> {
        if self.webhook.matches(method, path) {
            return Ok((RequestBody::Empty, Some(body)));
        }

        match media_type(headers).as_deref() {
            Some(JSON) => {
                let bytes = read_limited(headers, body, self.json_limit).await?;
                if bytes.iter().all(u8::is_ascii_whitespace) {
                    return Ok((RequestBody::Empty, None));
                }
                let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
                    AppError::bad_request("Invalid JSON payload")
                        .with_detail(e.to_string())
                        .with_origin("body")
                })?;
                Ok((RequestBody::Structured(value), None))
            }
            Some(FORM_URLENCODED) => {
                let bytes = read_limited(headers, body, self.urlencoded_limit).await?;
                let text = std::str::from_utf8(&bytes).map_err(|e| {
                    AppError::bad_request("Invalid url-encoded payload")
                        .with_detail(e.to_string())
                        .with_origin("body")
                })?;
                Ok((RequestBody::Structured(Value::Object(parse_params(text))), None))
            }
            _ => Ok((RequestBody::Empty, Some(body))),
        }
    }
}

/// Lowercased media type without parameters.
pub fn media_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
}

pub(crate) async fn read_limited(headers: &HeaderMap, body: Body, limit: usize) -> AppResult<Bytes> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(AppError::payload_too_large(limit).with_origin("body"));
    }

    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            Err(AppError::payload_too_large(limit).with_origin("body"))
        }
        Err(err) => Err(AppError::bad_request("Failed to read request body")
            .with_detail(err.to_string())
            .with_origin("body")),
    }
}

/// Middleware: the raw rule.
pub async fn ingest_raw_body(
    State(ingestion): State<Arc<BodyIngestion>>,
    request: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let (parts, body) = request.into_parts();
    let (ingested, untouched) = ingestion
        .ingest_raw(&parts.method, parts.uri.path(), &parts.headers, body)
        .await?;
    Ok(next.run(store_ingested(parts, ingested, untouched)).await)
}

/// Middleware: the structured rule. Skipped once the raw rule claimed the body.
pub async fn ingest_structured_body(
    State(ingestion): State<Arc<BodyIngestion>>,
    request: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let claimed = request
        .extensions()
        .get::<RequestContext>()
        .is_some_and(|ctx| ctx.body != RequestBody::Empty);
    if claimed {
        return Ok(next.run(request).await);
    }

    let (parts, body) = request.into_parts();
    let (ingested, untouched) = ingestion
        .ingest_structured(&parts.method, parts.uri.path(), &parts.headers, body)
        .await?;
    Ok(next.run(store_ingested(parts, ingested, untouched)).await)
}

fn store_ingested(
    mut parts: Parts,
    ingested: RequestBody,
    untouched: Option<Body>,
) -> Request<Body> {
    if let Some(ctx) = parts.extensions.get_mut::<RequestContext>() {
        ctx.body = ingested;
    }

    let body = match untouched {
        Some(stream) => stream,
        None => {
            parts.headers.remove(header::CONTENT_LENGTH);
            Body::empty()
        }
    };
    Request::from_parts(parts, body)
}
