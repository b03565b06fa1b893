//! HTTP server.
//!
//! # Responsibilities
//! - Bind the assembled pipeline to a listener
//! - Expose the peer address to the context stage
//! - Purge expired rate-limit windows in the background
//! - Drain in-flight requests on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::pipeline::Pipeline;
use crate::security::RateLimiter;

/// HTTP server for the gateway.
pub struct HttpServer {
    pipeline: Pipeline,
}

impl HttpServer {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    /// Run the server until `shutdown` fires, then drain and return.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            environment = %self.pipeline.config().environment,
            "HTTP server starting"
        );

        if let Some(limiter) = self.pipeline.rate_limiter() {
            let limiter = limiter.clone();
            let stop = shutdown.resubscribe();
            tokio::spawn(purge_windows(limiter, stop));
        }

        let app = self
            .pipeline
            .into_router()
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        self.pipeline.config()
    }
}

/// Drop counters whose window has elapsed, once per window.
async fn purge_windows(limiter: Arc<RateLimiter>, mut shutdown: broadcast::Receiver<()>) {
    let period = limiter.window().max(Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let purged = limiter.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired rate-limit windows");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}
