//! Routing dispatcher and not-found fallback.
//!
//! # Responsibilities
//! - Hand the webhook endpoint to the webhook collaborator
//! - Offer the request to each matching binding in registration order
//! - Raise a 404 naming the original URL when nobody claims it
//!
//! # Design Decisions
//! - Routers see the path below their mount prefix, the sanitized query,
//!   and the sanitized structured body re-encoded as JSON
//! - A body no parser claimed is buffered once, up to the passthrough
//!   limit, so a router that passes does not take it from the next one
//! - Router failures keep their own origin; unlabelled ones get the router
//!   name
//! - Dispatch itself never fails except by falling through

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, Request, Uri, Version},
    response::Response,
};
use bytes::Bytes;

use crate::error::{AppError, AppResult};
use crate::config::BodyConfig;
use crate::http::body::{read_limited, WebhookRule};
use crate::http::context::{RequestBody, RequestContext};
use crate::http::params::encode_params;
use crate::routing::collaborator::{Routed, WebhookHandler};
use crate::routing::table::{RouteBinding, RouteTable};

pub struct Dispatcher {
    table: RouteTable,
    webhook_rule: WebhookRule,
    webhook: Arc<dyn WebhookHandler>,
    passthrough_limit: usize,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("table", &self.table)
            .field("webhook_rule", &self.webhook_rule)
            .field("passthrough_limit", &self.passthrough_limit)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(table: RouteTable, webhook_rule: WebhookRule, webhook: Arc<dyn WebhookHandler>) -> Self {
        Self {
            table,
            webhook_rule,
            webhook,
            passthrough_limit: BodyConfig::default().passthrough_limit,
        }
    }

    pub fn passthrough_limit(mut self, limit: usize) -> Self {
        self.passthrough_limit = limit;
        self
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    pub async fn dispatch(&self, request: Request<Body>) -> AppResult<Response> {
        let (parts, body) = request.into_parts();
        let ctx = parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| AppError::defect("request context missing").with_origin("dispatch"))?;
        let path = parts.uri.path().to_string();

        if self.webhook_rule.matches(&parts.method, &path) {
            let payload = ctx.body.as_raw().cloned().unwrap_or_default();
            tracing::debug!(
                request_id = %ctx.request_id,
                bytes = payload.len(),
                "Dispatching webhook"
            );
            return self
                .webhook
                .handle(parts.headers, payload)
                .await
                .map_err(|e| e.or_origin("webhook"));
        }

        let unclaimed = match ctx.body {
            RequestBody::Empty => read_limited(&parts.headers, body, self.passthrough_limit).await?,
            _ => Bytes::new(),
        };
        let template = RequestTemplate {
            method: parts.method,
            version: parts.version,
            headers: parts.headers,
            ctx,
            unclaimed,
        };

        for binding in self.table.matching(&path) {
            let name = binding.router().name().to_string();
            let request = template.request_for(binding, &path)?;
            let routed = binding
                .router()
                .handle(request)
                .await
                .map_err(|e| e.or_origin(name.clone()))?;

            match routed {
                Routed::Response(response) => {
                    tracing::trace!(router = %name, status = %response.status(), "Router responded");
                    return Ok(response);
                }
                Routed::Pass => {
                    tracing::trace!(router = %name, path = %path, "Router passed");
                }
            }
        }

        Err(not_found(&template.ctx))
    }
}

/// The catch-all after every registered binding.
pub fn not_found(ctx: &RequestContext) -> AppError {
    AppError::not_found(&ctx.original_url).with_origin("fallback")
}

/// What is needed to offer the same request to several routers in turn.
struct RequestTemplate {
    method: Method,
    version: Version,
    headers: HeaderMap,
    ctx: RequestContext,
    /// Payload of a media type no parser claims, shared by every router.
    unclaimed: Bytes,
}

impl RequestTemplate {
    fn request_for(&self, binding: &RouteBinding, path: &str) -> AppResult<Request<Body>> {
        let sub_path = binding.prefix().strip(path);
        let query = encode_params(&self.ctx.query);
        let uri: Uri = if query.is_empty() {
            sub_path.parse()
        } else {
            format!("{}?{}", sub_path, query).parse()
        }
        .map_err(|e| AppError::defect(e).with_origin("dispatch"))?;

        let mut headers = self.headers.clone();
        let body = match &self.ctx.body {
            RequestBody::Structured(value) => {
                let bytes = Bytes::from(serde_json::to_vec(value)?);
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static(crate::http::body::JSON),
                );
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                Body::from(bytes)
            }
            RequestBody::Raw(_) => {
                headers.remove(header::CONTENT_LENGTH);
                Body::empty()
            }
            RequestBody::Empty => Body::from(self.unclaimed.clone()),
        };

        let mut ctx = self.ctx.clone();
        ctx.matched_route = Some(binding.prefix().as_str().to_string());

        let mut request = Request::builder()
            .method(self.method.clone())
            .version(self.version)
            .uri(uri)
            .body(body)
            .map_err(|e| AppError::defect(e).with_origin("dispatch"))?;
        *request.headers_mut() = headers;
        request.extensions_mut().insert(ctx);
        Ok(request)
    }
}

/// Handler: the dispatch stage, mounted as the pipeline's innermost fallback.
pub async fn dispatch(
    State(dispatcher): State<Arc<Dispatcher>>,
    request: Request<Body>,
) -> AppResult<Response> {
    dispatcher.dispatch(request).await
}
