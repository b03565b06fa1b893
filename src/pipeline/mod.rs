//! Request pipeline assembly.
//!
//! # Data Flow
//! ```text
//! Request
//!     → request logging (development) → request id → CORS / preflight
//!     → error conversion (terminal, wraps everything below)
//!     → panic catcher → request context → static files
//!     → security headers → rate limit (/api) → deadline (optional)
//!     → body ingestion (raw webhook rule, then structured)
//!     → operator sanitizer → markup sanitizer → parameter pollution
//!     → compression → dispatch → not-found fallback
//! ```
//!
//! # Design Decisions
//! - The stage sequence is a fixed, named list checked at build time
//! - Collaborators, the rate-limit store and the clock are injected
//! - The assembled router is immutable and shared across requests

use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, Router};
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::config::validation::{validate_config, ValidationError};
use crate::config::AppConfig;
use crate::error::{convert_errors, panic_to_defect, ErrorConverter};
use crate::http::body::{ingest_raw_body, ingest_structured_body, BodyIngestion};
use crate::http::context::{attach_context, ContextSettings};
use crate::http::cors::{answer_preflight, cors_layer};
use crate::http::deadline::enforce_deadline;
use crate::routing::dispatcher::dispatch;
use crate::routing::{Collaborators, Dispatcher, RouteTable, RoutingError, WebhookHandler};
use crate::security::headers::security_headers;
use crate::security::pollution::prevent_pollution;
use crate::security::rate_limit::rate_limit;
use crate::security::sanitize::{escape_markup, strip_operators};
use crate::security::{Clock, InMemoryStore, ParameterPollution, RateLimitStore, RateLimiter, SystemClock};

/// A named step of the pipeline, listed outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    RequestLogging,
    RequestId,
    Cors,
    ErrorConversion,
    PanicCatcher,
    Context,
    StaticFiles,
    SecurityHeaders,
    RateLimit,
    Deadline,
    RawWebhookBody,
    StructuredBody,
    OperatorSanitizer,
    MarkupSanitizer,
    ParameterPollution,
    Compression,
    Dispatch,
    Fallback,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::RequestLogging => "request-logging",
            Stage::RequestId => "request-id",
            Stage::Cors => "cors",
            Stage::ErrorConversion => "error-conversion",
            Stage::PanicCatcher => "panic-catcher",
            Stage::Context => "context",
            Stage::StaticFiles => "static-files",
            Stage::SecurityHeaders => "security-headers",
            Stage::RateLimit => "rate-limit",
            Stage::Deadline => "deadline",
            Stage::RawWebhookBody => "raw-webhook-body",
            Stage::StructuredBody => "structured-body",
            Stage::OperatorSanitizer => "operator-sanitizer",
            Stage::MarkupSanitizer => "markup-sanitizer",
            Stage::ParameterPollution => "parameter-pollution",
            Stage::Compression => "compression",
            Stage::Dispatch => "dispatch",
            Stage::Fallback => "fallback",
        }
    }

    /// Stages that cannot be switched off by configuration.
    pub fn is_required(&self) -> bool {
        matches!(
            self,
            Stage::RequestId
                | Stage::Cors
                | Stage::ErrorConversion
                | Stage::PanicCatcher
                | Stage::Context
                | Stage::RawWebhookBody
                | Stage::StructuredBody
                | Stage::OperatorSanitizer
                | Stage::MarkupSanitizer
                | Stage::ParameterPollution
                | Stage::Dispatch
                | Stage::Fallback
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub const STAGE_ORDER: [Stage; 18] = [
    Stage::RequestLogging,
    Stage::RequestId,
    Stage::Cors,
    Stage::ErrorConversion,
    Stage::PanicCatcher,
    Stage::Context,
    Stage::StaticFiles,
    Stage::SecurityHeaders,
    Stage::RateLimit,
    Stage::Deadline,
    Stage::RawWebhookBody,
    Stage::StructuredBody,
    Stage::OperatorSanitizer,
    Stage::MarkupSanitizer,
    Stage::ParameterPollution,
    Stage::Compression,
    Stage::Dispatch,
    Stage::Fallback,
];

/// The stages `config` switches on, in pipeline order.
pub fn enabled_stages(config: &AppConfig) -> Vec<Stage> {
    STAGE_ORDER
        .iter()
        .copied()
        .filter(|stage| match stage {
            Stage::RequestLogging => config.environment.is_development(),
            Stage::StaticFiles => config.static_files.enabled,
            Stage::SecurityHeaders => config.security.enable_headers,
            Stage::RateLimit => config.rate_limit.enabled,
            Stage::Deadline => config.timeouts.request_secs.is_some(),
            Stage::Compression => config.compression.enabled,
            _ => true,
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid configuration: {}", join(.0))]
    Config(Vec<ValidationError>),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error("stage order violated: {0}")]
    Order(String),
    #[error("no {0} supplied")]
    Missing(&'static str),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Check the ordering constraints between stages.
pub fn validate_order(stages: &[Stage]) -> Result<(), PipelineError> {
    let position = |stage: Stage| stages.iter().position(|s| *s == stage);

    for (i, stage) in stages.iter().enumerate() {
        if stages[..i].contains(stage) {
            return Err(PipelineError::Order(format!("{} appears twice", stage)));
        }
    }

    for stage in STAGE_ORDER.iter().filter(|s| s.is_required()) {
        if position(*stage).is_none() {
            return Err(PipelineError::Order(format!("{} is missing", stage)));
        }
    }

    let before = |first: Stage, second: Stage| -> Result<(), PipelineError> {
        match (position(first), position(second)) {
            (Some(a), Some(b)) if a > b => Err(PipelineError::Order(format!(
                "{} must run before {}",
                first, second
            ))),
            _ => Ok(()),
        }
    };

    before(Stage::ErrorConversion, Stage::PanicCatcher)?;
    before(Stage::ErrorConversion, Stage::RateLimit)?;
    before(Stage::ErrorConversion, Stage::StructuredBody)?;
    before(Stage::Context, Stage::RateLimit)?;
    before(Stage::RateLimit, Stage::RawWebhookBody)?;
    before(Stage::RateLimit, Stage::StructuredBody)?;
    before(Stage::RawWebhookBody, Stage::StructuredBody)?;
    before(Stage::StructuredBody, Stage::OperatorSanitizer)?;
    before(Stage::StructuredBody, Stage::MarkupSanitizer)?;
    before(Stage::StructuredBody, Stage::ParameterPollution)?;
    before(Stage::ParameterPollution, Stage::Dispatch)?;
    before(Stage::Dispatch, Stage::Fallback)?;

    if stages.last() != Some(&Stage::Fallback) {
        return Err(PipelineError::Order("fallback must be the last stage".into()));
    }
    // Dispatch and the fallback share the innermost router.
    if stages.len() < 2 || stages[stages.len() - 2] != Stage::Dispatch {
        return Err(PipelineError::Order("dispatch must directly precede fallback".into()));
    }
    Ok(())
}

/// Assembles the pipeline from configuration and injected parts.
pub struct PipelineBuilder {
    config: AppConfig,
    routes: Option<RouteTable>,
    webhook: Option<Arc<dyn WebhookHandler>>,
    store: Option<Arc<dyn RateLimitStore>>,
    clock: Option<Arc<dyn Clock>>,
    stages: Option<Vec<Stage>>,
}

impl PipelineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            routes: None,
            webhook: None,
            store: None,
            clock: None,
            stages: None,
        }
    }

    /// Replace the stage list derived from configuration.
    ///
    /// The list is validated like the derived one; `Stage::Deadline` still
    /// needs `timeouts.request_secs`.
    pub fn stages(mut self, stages: Vec<Stage>) -> Self {
        self.stages = Some(stages);
        self
    }

    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = Some(routes);
        self
    }

    pub fn webhook(mut self, handler: Arc<dyn WebhookHandler>) -> Self {
        self.webhook = Some(handler);
        self
    }

    /// Standard route table and webhook handler in one go.
    pub fn collaborators(self, collaborators: Collaborators) -> Result<Self, PipelineError> {
        let routes = collaborators.route_table()?;
        Ok(self.routes(routes).webhook(collaborators.webhook))
    }

    pub fn rate_limit_store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        validate_config(&self.config).map_err(PipelineError::Config)?;
        let stages = match self.stages {
            Some(stages) => stages,
            None => enabled_stages(&self.config),
        };
        validate_order(&stages)?;

        let routes = self.routes.ok_or(PipelineError::Missing("route table"))?;
        let webhook = self.webhook.ok_or(PipelineError::Missing("webhook handler"))?;
        let deadline = match (stages.contains(&Stage::Deadline), self.config.timeouts.request_secs) {
            (true, None) => return Err(PipelineError::Missing("request deadline")),
            (_, secs) => secs.map(Duration::from_secs),
        };
        let config = self.config;

        let ingestion = Arc::new(BodyIngestion::new(&config.body));
        let dispatcher = Arc::new(
            Dispatcher::new(routes, ingestion.webhook().clone(), webhook)
                .passthrough_limit(config.body.passthrough_limit),
        );
        let limiter = stages.contains(&Stage::RateLimit).then(|| {
            let store: Arc<dyn RateLimitStore> = match self.store {
                Some(store) => store,
                None => Arc::new(InMemoryStore::new()),
            };
            let clock: Arc<dyn Clock> = match self.clock {
                Some(clock) => clock,
                None => Arc::new(SystemClock),
            };
            Arc::new(RateLimiter::with_parts(&config.rate_limit, store, clock))
        });

        // Innermost first: each layer wraps the stages after it.
        let mut app: Router = Router::new();
        for stage in stages.iter().rev() {
            app = match stage {
                Stage::Fallback => Router::new().fallback(dispatch).with_state(dispatcher.clone()),
                // Runs inside the fallback handler installed above.
                Stage::Dispatch => app,
                Stage::Compression => app.layer(CompressionLayer::new()),
                Stage::ParameterPollution => {
                    let pollution = Arc::new(ParameterPollution::new(
                        config.security.parameter_whitelist.iter().cloned(),
                    ));
                    app.layer(middleware::from_fn_with_state(pollution, prevent_pollution))
                }
                Stage::MarkupSanitizer => app.layer(middleware::from_fn(escape_markup)),
                Stage::OperatorSanitizer => app.layer(middleware::from_fn(strip_operators)),
                Stage::StructuredBody => app.layer(middleware::from_fn_with_state(
                    ingestion.clone(),
                    ingest_structured_body,
                )),
                Stage::RawWebhookBody => app.layer(middleware::from_fn_with_state(
                    ingestion.clone(),
                    ingest_raw_body,
                )),
                Stage::Deadline => match deadline {
                    Some(deadline) => app.layer(middleware::from_fn_with_state(deadline, enforce_deadline)),
                    None => app,
                },
                Stage::RateLimit => match &limiter {
                    Some(limiter) => app.layer(middleware::from_fn_with_state(limiter.clone(), rate_limit)),
                    None => app,
                },
                Stage::SecurityHeaders => app.layer(middleware::from_fn(security_headers)),
                Stage::StaticFiles => {
                    let files = ServeDir::new(&config.static_files.dir)
                        .call_fallback_on_method_not_allowed(true)
                        .fallback(app);
                    Router::new().fallback_service(files)
                }
                Stage::Context => {
                    let settings = ContextSettings {
                        trust_proxy: config.listener.trust_proxy,
                    };
                    app.layer(middleware::from_fn_with_state(settings, attach_context))
                }
                Stage::PanicCatcher => app.layer(CatchPanicLayer::custom(panic_to_defect)),
                Stage::ErrorConversion => {
                    let converter = Arc::new(ErrorConverter::new(config.environment));
                    app.layer(middleware::from_fn_with_state(converter, convert_errors))
                }
                Stage::Cors => app
                    .layer(cors_layer())
                    .layer(middleware::from_fn(answer_preflight)),
                Stage::RequestId => app
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid)),
                Stage::RequestLogging => app.layer(TraceLayer::new_for_http()),
            };
        }

        tracing::info!(
            environment = %config.environment,
            stages = %stages.iter().map(Stage::name).collect::<Vec<_>>().join(","),
            "Pipeline assembled"
        );

        Ok(Pipeline {
            router: app,
            stages,
            rate_limiter: limiter,
            config,
        })
    }
}

/// The assembled request pipeline.
pub struct Pipeline {
    router: Router,
    stages: Vec<Stage>,
    rate_limiter: Option<Arc<RateLimiter>>,
    config: AppConfig,
}

impl Pipeline {
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.rate_limiter.as_ref()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn into_router(self) -> Router {
        self.router
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages)
            .field("rate_limited", &self.rate_limiter.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    fn without(stage: Stage) -> Vec<Stage> {
        STAGE_ORDER.iter().copied().filter(|s| *s != stage).collect()
    }

    #[test]
    fn test_fixed_order_is_valid() {
        assert!(validate_order(&STAGE_ORDER).is_ok());
    }

    #[test]
    fn test_default_production_stages() {
        let stages = enabled_stages(&AppConfig::default());
        assert!(!stages.contains(&Stage::RequestLogging));
        assert!(!stages.contains(&Stage::Deadline));
        assert!(stages.contains(&Stage::RateLimit));
        assert_eq!(stages.last(), Some(&Stage::Fallback));
        assert!(validate_order(&stages).is_ok());
    }

    #[test]
    fn test_development_adds_request_logging() {
        let mut config = AppConfig::default();
        config.environment = Environment::Development;
        config.timeouts.request_secs = Some(30);
        let stages = enabled_stages(&config);
        assert_eq!(stages.first(), Some(&Stage::RequestLogging));
        assert!(stages.contains(&Stage::Deadline));
    }

    #[test]
    fn test_structured_before_raw_is_rejected() {
        let mut stages = STAGE_ORDER.to_vec();
        let raw = stages.iter().position(|s| *s == Stage::RawWebhookBody).unwrap();
        let structured = stages.iter().position(|s| *s == Stage::StructuredBody).unwrap();
        stages.swap(raw, structured);
        let err = validate_order(&stages).unwrap_err();
        assert_eq!(
            err.to_string(),
            "stage order violated: raw-webhook-body must run before structured-body"
        );
    }

    #[test]
    fn test_body_before_rate_limit_is_rejected() {
        let mut stages: Vec<Stage> = STAGE_ORDER
            .iter()
            .copied()
            .filter(|s| *s != Stage::RateLimit)
            .collect();
        let dispatch = stages.iter().position(|s| *s == Stage::Dispatch).unwrap();
        stages.insert(dispatch, Stage::RateLimit);
        assert!(matches!(validate_order(&stages), Err(PipelineError::Order(_))));
    }

    #[test]
    fn test_missing_required_stage_is_rejected() {
        let stages: Vec<Stage> = STAGE_ORDER
            .iter()
            .copied()
            .filter(|s| *s != Stage::MarkupSanitizer)
            .collect();
        let err = validate_order(&stages).unwrap_err();
        assert_eq!(err.to_string(), "stage order violated: markup-sanitizer is missing");
    }

    #[test]
    fn test_build_requires_routes() {
        let err = PipelineBuilder::new(AppConfig::default()).build().unwrap_err();
        assert!(matches!(err, PipelineError::Missing("route table")));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = AppConfig::default();
        config.rate_limit.max_requests = 0;
        let err = PipelineBuilder::new(config)
            .collaborators(Collaborators::placeholder())
            .unwrap()
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_build_with_placeholders() {
        let pipeline = PipelineBuilder::new(AppConfig::default())
            .collaborators(Collaborators::placeholder())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(pipeline.stages(), enabled_stages(&AppConfig::default()).as_slice());
        assert!(pipeline.rate_limiter().is_some());
    }

    #[test]
    fn test_dispatch_must_precede_fallback() {
        let mut stages = without(Stage::Compression);
        let dispatch = stages.iter().position(|s| *s == Stage::Dispatch).unwrap();
        stages.insert(dispatch + 1, Stage::Compression);
        let err = validate_order(&stages).unwrap_err();
        assert_eq!(
            err.to_string(),
            "stage order violated: dispatch must directly precede fallback"
        );
    }

    #[test]
    fn test_build_rejects_misordered_stages() {
        let mut stages = enabled_stages(&AppConfig::default());
        let conversion = stages.iter().position(|s| *s == Stage::ErrorConversion).unwrap();
        let panic = stages.iter().position(|s| *s == Stage::PanicCatcher).unwrap();
        stages.swap(conversion, panic);
        let err = PipelineBuilder::new(AppConfig::default())
            .collaborators(Collaborators::placeholder())
            .unwrap()
            .stages(stages)
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Order(_)));
    }

    #[test]
    fn test_deadline_stage_needs_duration() {
        let err = PipelineBuilder::new(AppConfig::default())
            .collaborators(Collaborators::placeholder())
            .unwrap()
            .stages(STAGE_ORDER.to_vec())
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Missing("request deadline")));
    }

    #[tokio::test]
    async fn test_router_follows_stage_list() {
        let mut config = AppConfig::default();
        config.static_files.enabled = false;
        let stages: Vec<Stage> = enabled_stages(&config)
            .into_iter()
            .filter(|s| *s != Stage::SecurityHeaders)
            .collect();

        let pipeline = PipelineBuilder::new(config)
            .collaborators(Collaborators::placeholder())
            .unwrap()
            .stages(stages)
            .build()
            .unwrap();
        assert!(!pipeline.stages().contains(&Stage::SecurityHeaders));

        let response = pipeline
            .into_router()
            .oneshot(Request::builder().uri("/api/v1/tours").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("x-frame-options"));
        assert_eq!(response.headers()["x-ratelimit-limit"], "100");
    }

    #[tokio::test]
    async fn test_rate_limit_off_the_list_is_not_installed() {
        let mut config = AppConfig::default();
        config.static_files.enabled = false;
        config.rate_limit.max_requests = 1;

        let pipeline = PipelineBuilder::new(config.clone())
            .collaborators(Collaborators::placeholder())
            .unwrap()
            .stages(without(Stage::RateLimit).into_iter().filter(|s| *s != Stage::Deadline).collect())
            .build()
            .unwrap();
        assert!(pipeline.rate_limiter().is_none());

        let router = pipeline.into_router();
        for _ in 0..3 {
            let response = router
                .clone()
                .oneshot(Request::builder().uri("/api/v1/users").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(!response.headers().contains_key("x-ratelimit-limit"));
        }
    }
}
