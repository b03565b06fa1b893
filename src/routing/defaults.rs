//! Stand-in collaborators for running the gateway on its own.

use axum::{
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::http::context::{RequestBody, RequestContext};
use crate::routing::collaborator::{ResourceRouter, Routed, WebhookHandler};

/// Answers every request with a JSON description of what reached it.
#[derive(Debug, Clone)]
pub struct EchoRouter {
    resource: String,
}

impl EchoRouter {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
        }
    }
}

impl ResourceRouter for EchoRouter {
    fn name(&self) -> &str {
        &self.resource
    }

    fn handle(&self, request: Request<Body>) -> BoxFuture<'static, AppResult<Routed>> {
        let resource = self.resource.clone();
        Box::pin(async move {
            let ctx = request
                .extensions()
                .get::<RequestContext>()
                .cloned()
                .ok_or_else(|| AppError::defect("request context missing"))?;

            let body = match &ctx.body {
                RequestBody::Structured(value) => value.clone(),
                _ => Value::Null,
            };

            let payload = json!({
                "status": "success",
                "requestedAt": ctx.request_time_iso(),
                "resource": resource,
                "data": {
                    "method": request.method().as_str(),
                    "path": request.uri().path(),
                    "query": ctx.query,
                    "cookies": ctx.cookies,
                    "body": body,
                },
            });
            Ok(Routed::Response(Json(payload).into_response()))
        })
    }
}

/// Views placeholder: owns `GET /` and passes on everything else.
#[derive(Debug, Clone, Default)]
pub struct LandingPage;

const LANDING_HTML: &str = "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>Natours | Exciting tours for adventurous people</title></head>\n<body><h1>All tours</h1></body>\n</html>\n";

impl ResourceRouter for LandingPage {
    fn name(&self) -> &str {
        "views"
    }

    fn handle(&self, request: Request<Body>) -> BoxFuture<'static, AppResult<Routed>> {
        let owned = request.uri().path() == "/"
            && (request.method() == Method::GET || request.method() == Method::HEAD);
        Box::pin(async move {
            if owned {
                Ok(Routed::Response(Html(LANDING_HTML).into_response()))
            } else {
                Ok(Routed::Pass)
            }
        })
    }
}

/// Accepts every webhook delivery without verifying it.
#[derive(Debug, Clone, Default)]
pub struct AcknowledgeWebhook;

impl WebhookHandler for AcknowledgeWebhook {
    fn handle(&self, _headers: HeaderMap, payload: Bytes) -> BoxFuture<'static, AppResult<Response>> {
        Box::pin(async move {
            tracing::info!(bytes = payload.len(), "Webhook received");
            Ok((
                StatusCode::OK,
                Json(json!({ "received": true, "bytes": payload.len() })),
            )
                .into_response())
        })
    }
}
