//! Per-request context.
//!
//! Created at pipeline entry, enriched by later stages (body, sanitized
//! query, matched route), and dropped with the request.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use cookie::Cookie;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::AppError;
use crate::http::params::parse_params;
use crate::observability::metrics;

/// What the body ingestion stage made of the payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    /// No body, or a media type no parser claims.
    #[default]
    Empty,
    /// Decoded JSON or url-encoded payload.
    Structured(Value),
    /// Verbatim bytes for the webhook endpoint.
    Raw(Bytes),
}

impl RequestBody {
    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            RequestBody::Structured(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> Option<&Bytes> {
        match self {
            RequestBody::Raw(b) => Some(b),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub request_time: DateTime<Utc>,
    pub client_ip: Option<IpAddr>,
    /// Path and query exactly as received.
    pub original_url: String,
    pub query: Map<String, Value>,
    /// Request cookies, percent-decoded. The first of repeated names wins.
    pub cookies: BTreeMap<String, String>,
    pub body: RequestBody,
    /// Mount prefix of the router currently handling the request.
    pub matched_route: Option<String>,
}

impl RequestContext {
    pub fn from_request(request: &Request<Body>, trust_proxy: bool) -> Self {
        let uri = request.uri();
        let original_url = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string());

        let request_id = request
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let connect_ip = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        Self {
            request_id,
            request_time: Utc::now(),
            client_ip: client_ip(request.headers(), connect_ip, trust_proxy),
            original_url,
            query: uri.query().map(parse_params).unwrap_or_default(),
            cookies: parse_cookies(request.headers()),
            body: RequestBody::Empty,
            matched_route: None,
        }
    }

    /// Arrival time as an RFC 3339 string with millisecond precision.
    pub fn request_time_iso(&self) -> String {
        self.request_time.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Key used by the traffic shaping stage.
    pub fn client_key(&self) -> String {
        self.client_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Collect every `Cookie` header; malformed pairs are skipped.
pub fn parse_cookies(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();
    for value in headers.get_all(header::COOKIE) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for cookie in Cookie::split_parse_encoded(value).flatten() {
            cookies
                .entry(cookie.name().to_string())
                .or_insert_with(|| cookie.value().to_string());
        }
    }
    cookies
}

/// Resolve the client address, honouring `X-Forwarded-For` behind a proxy.
pub fn client_ip(
    headers: &HeaderMap,
    connect_ip: Option<IpAddr>,
    trust_proxy: bool,
) -> Option<IpAddr> {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }
    connect_ip
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| AppError::defect("request context missing").with_origin("context"))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ContextSettings {
    pub trust_proxy: bool,
}

/// Entry stage: stamp the request and record request metrics on the way out.
pub async fn attach_context(
    State(settings): State<ContextSettings>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let ctx = RequestContext::from_request(&request, settings.trust_proxy);

    tracing::debug!(
        request_id = %ctx.request_id,
        method = %method,
        url = %ctx.original_url,
        client = %ctx.client_key(),
        "Request received"
    );

    request.extensions_mut().insert(ctx);
    let response = next.run(request).await;
    metrics::record_request(&method, response.status().as_u16(), start);
    response
}
