//! Shared utilities for pipeline and server tests.

#![allow(dead_code)]

use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing, Json, Router,
};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use tour_gateway::config::{AppConfig, Environment};
use tour_gateway::error::{AppError, AppResult};
use tour_gateway::http::RequestContext;
use tour_gateway::routing::defaults::{EchoRouter, LandingPage};
use tour_gateway::routing::{AxumRouter, ResourceRouter, WebhookHandler};
use tour_gateway::security::{InMemoryStore, ManualClock};
use tour_gateway::{Collaborators, Pipeline, PipelineBuilder};

/// Keeps every payload it receives so tests can compare bytes.
#[derive(Debug, Default, Clone)]
pub struct RecordingWebhook {
    pub received: Arc<Mutex<Vec<Bytes>>>,
}

impl WebhookHandler for RecordingWebhook {
    fn handle(&self, _headers: HeaderMap, payload: Bytes) -> BoxFuture<'static, AppResult<Response>> {
        let received = self.received.clone();
        Box::pin(async move {
            if let Ok(mut received) = received.lock() {
                received.push(payload.clone());
            }
            Ok(Json(json!({ "received": true, "bytes": payload.len() })).into_response())
        })
    }
}

/// Tours router with routes that succeed, fail and panic.
pub fn tours_router() -> Router {
    Router::new()
        .route(
            "/",
            routing::get(|ctx: RequestContext| async move {
                Json(json!({ "status": "success", "query": ctx.query }))
            })
            .post(|ctx: RequestContext| async move {
                (
                    StatusCode::CREATED,
                    Json(json!({ "status": "success", "data": ctx.body.as_structured() })),
                )
            }),
        )
        .route(
            "/broken",
            routing::get(|| async {
                Err::<Json<Value>, _>(
                    AppError::defect("Cast to ObjectId failed for value \"broken\"")
                        .with_detail("CastError: at tourController.getTour (tourController.js:42)"),
                )
            }),
        )
        .route(
            "/missing",
            routing::get(|| async {
                Err::<Json<Value>, _>(AppError::new("No tour found with that ID", StatusCode::NOT_FOUND))
            }),
        )
        .route("/panic", routing::get(explode))
}

async fn explode() -> &'static str {
    panic!("index out of bounds")
}

pub struct TestGateway {
    pub pipeline: Pipeline,
    pub clock: ManualClock,
    pub store: Arc<InMemoryStore>,
    pub webhook: RecordingWebhook,
}

impl TestGateway {
    pub fn router(&self) -> Router {
        self.pipeline.router()
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        match self.router().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}

pub fn config(environment: Environment) -> AppConfig {
    let mut config = AppConfig::default();
    config.environment = environment;
    config.static_files.enabled = false;
    config
}

pub fn gateway(config: AppConfig) -> TestGateway {
    gateway_with_users(config, Arc::new(EchoRouter::new("users")))
}

pub fn gateway_with_users(config: AppConfig, users: Arc<dyn ResourceRouter>) -> TestGateway {
    let clock = ManualClock::new();
    let store = Arc::new(InMemoryStore::new());
    let webhook = RecordingWebhook::default();

    let collaborators = Collaborators {
        views: Arc::new(LandingPage),
        tours: AxumRouter::shared("tours", tours_router()),
        users,
        reviews: Arc::new(EchoRouter::new("reviews")),
        bookings: Arc::new(EchoRouter::new("bookings")),
        webhook: Arc::new(webhook.clone()),
    };

    let pipeline = PipelineBuilder::new(config)
        .collaborators(collaborators)
        .unwrap()
        .rate_limit_store(store.clone())
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();

    TestGateway {
        pipeline,
        clock,
        store,
        webhook,
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn get_from(uri: &str, ip: IpAddr) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", ip.to_string())
        .body(Body::empty())
        .unwrap()
}

pub fn post(uri: &str, content_type: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, content_type)
        .body(body.into())
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub async fn body_text(response: Response) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).unwrap()
}
