//! tour-gateway
//!
//! Runs the API entry pipeline in front of placeholder resource routers.
//!
//! ```text
//!     Client ──▶ security ──▶ rate limit ──▶ body ──▶ sanitize ──▶ dispatch ──▶ router
//!                   │                                                  │
//!                   └──────────────── error conversion ◀───────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use tour_gateway::config::{apply_env_overrides, load_config, AppConfig, Environment};
use tour_gateway::lifecycle::Shutdown;
use tour_gateway::observability::{logging, metrics};
use tour_gateway::{Collaborators, HttpServer, PipelineBuilder};

#[derive(Parser)]
#[command(name = "tour-gateway")]
#[command(about = "API entry pipeline for the tours service", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the configured environment (development | production).
    #[arg(short, long)]
    env: Option<Environment>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    if let Some(env) = cli.env {
        config.environment = env;
    }

    logging::init(config.environment, &config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tour-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        environment = %config.environment,
        rate_limit = config.rate_limit.max_requests,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let pipeline = PipelineBuilder::new(config)
        .collaborators(Collaborators::placeholder())?
        .build()?;

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    shutdown.trigger_on_signal();

    HttpServer::new(pipeline).run(listener, receiver).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
