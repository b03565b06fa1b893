//! Interfaces to the resource routers and the payment webhook.
//!
//! Routers are opaque: the pipeline hands them a request and gets back a
//! typed result. They never format error bodies; they return `AppError`.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use tower::ServiceExt;

use crate::error::AppResult;

/// What a router did with a request.
#[derive(Debug)]
pub enum Routed {
    /// The router owns the request; dispatch ends here.
    Response(Response),
    /// Nothing in this router matched; the next binding may try.
    Pass,
}

pub trait ResourceRouter: Send + Sync {
    /// Name used in logs and as the error origin.
    fn name(&self) -> &str;

    /// `request` carries the path below the mount prefix.
    fn handle(&self, request: Request<Body>) -> BoxFuture<'static, AppResult<Routed>>;
}

/// Receives the payment provider's callback with the body exactly as sent.
pub trait WebhookHandler: Send + Sync {
    fn handle(&self, headers: HeaderMap, payload: Bytes) -> BoxFuture<'static, AppResult<Response>>;
}

#[derive(Debug, Clone, Copy)]
struct Unmatched;

async fn unmatched() -> Response {
    let mut response = StatusCode::NOT_FOUND.into_response();
    response.extensions_mut().insert(Unmatched);
    response
}

/// Mounts an `axum::Router` as a resource router.
///
/// Requests the inner router has no route for, or no handler for the method,
/// are passed on instead of answered, so the pipeline's own fallback decides
/// what happens next.
#[derive(Clone)]
pub struct AxumRouter {
    name: String,
    router: Router,
}

impl AxumRouter {
    pub fn new(name: impl Into<String>, router: Router) -> Self {
        Self {
            name: name.into(),
            router: router
                .fallback(unmatched)
                .method_not_allowed_fallback(unmatched),
        }
    }

    pub fn shared(name: impl Into<String>, router: Router) -> Arc<dyn ResourceRouter> {
        Arc::new(Self::new(name, router))
    }
}

impl std::fmt::Debug for AxumRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AxumRouter").field("name", &self.name).finish()
    }
}

impl ResourceRouter for AxumRouter {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, request: Request<Body>) -> BoxFuture<'static, AppResult<Routed>> {
        let router = self.router.clone();
        Box::pin(async move {
            let response = match router.oneshot(request).await {
                Ok(response) => response,
                Err(never) => match never {},
            };
            if response.extensions().get::<Unmatched>().is_some() {
                Ok(Routed::Pass)
            } else {
                Ok(Routed::Response(response))
            }
        })
    }
}
