//! Fixed-window rate limiting per client IP.
//!
//! # Responsibilities
//! - Count requests per client within a fixed window
//! - Reject the request that would exceed the cap with a 429
//! - Advertise limit, remaining budget and reset time in headers
//!
//! # Design Decisions
//! - Storage and time are injected (`RateLimitStore`, `Clock`) so the stage
//!   can be tested deterministically and moved to a shared store later
//! - Check-and-increment happens under one map entry guard; it never awaits
//! - A rejected request does not consume budget, so the count never exceeds
//!   the cap

use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;

use crate::config::RateLimitConfig;
use crate::error::AppError;
use crate::http::context::RequestContext;
use crate::observability::metrics;
use crate::routing::matcher::PathPrefix;

/// Source of the current time.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Counter state for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub count: u64,
    pub window_start: Instant,
}

/// Outcome of one acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquisition {
    pub allowed: bool,
    pub state: WindowState,
}

/// Storage for per-client windows.
pub trait RateLimitStore: Send + Sync + Debug {
    /// Atomically count one request for `key`.
    ///
    /// Starts a fresh window when none exists or the current one has
    /// elapsed; refuses without counting when the window is already at `max`.
    fn try_acquire(&self, key: &str, now: Instant, window: Duration, max: u64) -> Acquisition;

    fn get(&self, key: &str) -> Option<WindowState>;

    /// Drop windows that elapsed before `now`. Returns how many were dropped.
    fn purge_expired(&self, now: Instant, window: Duration) -> usize;
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    windows: DashMap<String, WindowState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl RateLimitStore for InMemoryStore {
    fn try_acquire(&self, key: &str, now: Instant, window: Duration, max: u64) -> Acquisition {
        let mut entry = self.windows.entry(key.to_string()).or_insert(WindowState {
            count: 0,
            window_start: now,
        });

        if now.saturating_duration_since(entry.window_start) >= window {
            *entry = WindowState {
                count: 0,
                window_start: now,
            };
        }

        let allowed = entry.count < max;
        if allowed {
            entry.count += 1;
        }
        Acquisition {
            allowed,
            state: *entry,
        }
    }

    fn get(&self, key: &str) -> Option<WindowState> {
        self.windows.get(key).map(|entry| *entry)
    }

    fn purge_expired(&self, now: Instant, window: Duration) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, state| now.saturating_duration_since(state.window_start) < window);
        before - self.windows.len()
    }
}

/// What the client is told about its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u64,
    pub remaining: u64,
    pub reset_after: Duration,
}

impl RateLimitStatus {
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert("x-ratelimit-limit", HeaderValue::from(self.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(self.remaining));
        headers.insert(
            "x-ratelimit-reset",
            HeaderValue::from(self.reset_after.as_secs()),
        );
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    prefix: PathPrefix,
    max_requests: u64,
    window: Duration,
    message: String,
}

impl RateLimiter {
    /// In-memory store and the system clock.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_parts(config, Arc::new(InMemoryStore::new()), Arc::new(SystemClock))
    }

    pub fn with_parts(
        config: &RateLimitConfig,
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            clock,
            prefix: PathPrefix::new(&config.path_prefix),
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_secs),
            message: config.message.clone(),
        }
    }

    pub fn applies_to(&self, path: &str) -> bool {
        self.prefix.matches(path)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count one request for `key`; the error carries the status for headers.
    pub fn check(&self, key: &str) -> Result<RateLimitStatus, (AppError, RateLimitStatus)> {
        let now = self.clock.now();
        let acquisition = self
            .store
            .try_acquire(key, now, self.window, self.max_requests);

        let elapsed = now.saturating_duration_since(acquisition.state.window_start);
        let status = RateLimitStatus {
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(acquisition.state.count),
            reset_after: self.window.saturating_sub(elapsed),
        };

        if acquisition.allowed {
            Ok(status)
        } else {
            let err = AppError::too_many_requests(self.message.clone()).with_origin("rate_limit");
            Err((err, status))
        }
    }

    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired(self.clock.now(), self.window)
    }
}

/// Middleware: the traffic shaping stage.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !limiter.applies_to(request.uri().path()) {
        return next.run(request).await;
    }

    let key = request
        .extensions()
        .get::<RequestContext>()
        .map(RequestContext::client_key)
        .unwrap_or_else(|| "unknown".to_string());

    match limiter.check(&key) {
        Ok(status) => {
            let mut response = next.run(request).await;
            status.apply_headers(response.headers_mut());
            response
        }
        Err((err, status)) => {
            tracing::warn!(client = %key, path = %request.uri().path(), "Rate limit exceeded");
            metrics::record_rate_limited();
            let mut response = err.into_response();
            status.apply_headers(response.headers_mut());
            response.headers_mut().insert(
                axum::http::header::RETRY_AFTER,
                HeaderValue::from(status.reset_after.as_secs().max(1)),
            );
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn limiter(max: u64) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new();
        let config = RateLimitConfig {
            max_requests: max,
            ..Default::default()
        };
        let limiter =
            RateLimiter::with_parts(&config, Arc::new(InMemoryStore::new()), Arc::new(clock.clone()));
        (limiter, clock)
    }

    #[test]
    fn test_hundred_and_first_request_rejected() {
        let (limiter, _) = limiter(100);
        for i in 0..100 {
            let status = limiter.check("203.0.113.7").expect("within budget");
            assert_eq!(status.remaining, 99 - i);
        }

        let (err, status) = limiter.check("203.0.113.7").unwrap_err();
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            err.message(),
            "Too many requests from this IP, please try again in an hour!"
        );
        assert!(err.is_operational());
        assert_eq!(status.remaining, 0);
    }

    #[test]
    fn test_count_never_exceeds_cap() {
        let store = Arc::new(InMemoryStore::new());
        let clock = ManualClock::new();
        let config = RateLimitConfig {
            max_requests: 3,
            ..Default::default()
        };
        let limiter = RateLimiter::with_parts(&config, store.clone(), Arc::new(clock));
        for _ in 0..10 {
            let _ = limiter.check("a");
        }
        assert_eq!(store.get("a").unwrap().count, 3);
    }

    #[test]
    fn test_clients_are_independent() {
        let (limiter, _) = limiter(1);
        assert!(limiter.check("10.0.0.1").is_ok());
        assert!(limiter.check("10.0.0.1").is_err());
        assert!(limiter.check("10.0.0.2").is_ok());
    }

    #[test]
    fn test_window_elapses() {
        let (limiter, clock) = limiter(2);
        assert!(limiter.check("c").is_ok());
        assert!(limiter.check("c").is_ok());
        assert!(limiter.check("c").is_err());

        clock.advance(Duration::from_secs(59 * 60));
        assert!(limiter.check("c").is_err());

        clock.advance(Duration::from_secs(60));
        let status = limiter.check("c").expect("fresh window");
        assert_eq!(status.remaining, 1);
        assert_eq!(status.reset_after, Duration::from_secs(3600));
    }

    #[test]
    fn test_reset_after_counts_down() {
        let (limiter, clock) = limiter(5);
        limiter.check("d").unwrap();
        clock.advance(Duration::from_secs(600));
        let status = limiter.check("d").unwrap();
        assert_eq!(status.reset_after, Duration::from_secs(3000));
    }

    #[test]
    fn test_prefix_scope() {
        let (limiter, _) = limiter(1);
        assert!(limiter.applies_to("/api"));
        assert!(limiter.applies_to("/api/v1/tours"));
        assert!(!limiter.applies_to("/"));
        assert!(!limiter.applies_to("/apiary"));
        assert!(!limiter.applies_to("/webhook-checkout"));
    }

    #[test]
    fn test_purge_expired() {
        let (limiter, clock) = limiter(5);
        limiter.check("old").unwrap();
        clock.advance(Duration::from_secs(1800));
        limiter.check("new").unwrap();
        clock.advance(Duration::from_secs(1800));

        assert_eq!(limiter.purge_expired(), 1);
        assert_eq!(limiter.purge_expired(), 0);
    }

    #[test]
    fn test_status_headers() {
        let mut headers = HeaderMap::new();
        RateLimitStatus {
            limit: 100,
            remaining: 42,
            reset_after: Duration::from_secs(120),
        }
        .apply_headers(&mut headers);
        assert_eq!(headers["x-ratelimit-limit"], "100");
        assert_eq!(headers["x-ratelimit-remaining"], "42");
        assert_eq!(headers["x-ratelimit-reset"], "120");
    }
}
