//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Root configuration for the API gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address, proxy trust).
    pub listener: ListenerConfig,

    /// Runtime environment; controls error verbosity and request logging.
    pub environment: Environment,

    /// Per-IP rate limiting for API paths.
    pub rate_limit: RateLimitConfig,

    /// Body ingestion limits and the raw-body webhook rule.
    pub body: BodyConfig,

    /// Security hardening settings.
    pub security: SecurityConfig,

    /// Static asset serving.
    pub static_files: StaticFilesConfig,

    /// Response compression.
    pub compression: CompressionConfig,

    /// Optional request deadline.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Take the client IP from the first `X-Forwarded-For` entry.
    pub trust_proxy: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            trust_proxy: true,
        }
    }
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Environment {
    pub fn is_development(self) -> bool {
        matches!(self, Environment::Development)
    }

    /// Maps a `NODE_ENV`-style value; anything but "development" is production.
    pub fn from_node_env(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("development") {
            Environment::Development
        } else {
            Environment::Production
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => f.write_str("development"),
            Environment::Production => f.write_str("production"),
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Maximum requests per client IP within one window.
    pub max_requests: u64,

    /// Window length in seconds.
    pub window_secs: u64,

    /// Only paths under this prefix are counted.
    pub path_prefix: String,

    /// Message returned with the 429 response.
    pub message: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 100,
            window_secs: 60 * 60,
            path_prefix: "/api".to_string(),
            message: "Too many requests from this IP, please try again in an hour!".to_string(),
        }
    }
}

/// Body ingestion configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BodyConfig {
    /// Maximum JSON body size in bytes.
    pub json_limit: usize,

    /// Maximum url-encoded body size in bytes.
    pub urlencoded_limit: usize,

    /// Maximum raw webhook body size in bytes.
    pub raw_limit: usize,

    /// Maximum size of a body no parser claims (multipart uploads), buffered
    /// once so every router offered the request sees it.
    pub passthrough_limit: usize,

    /// The one endpoint whose body is preserved verbatim.
    pub webhook_path: String,

    /// Media type required for raw capture on the webhook endpoint.
    pub webhook_content_type: String,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            json_limit: 10 * 1024,
            urlencoded_limit: 10 * 1024,
            raw_limit: 100 * 1024,
            passthrough_limit: 5 * 1024 * 1024,
            webhook_path: "/webhook-checkout".to_string(),
            webhook_content_type: "application/json".to_string(),
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enable security headers.
    pub enable_headers: bool,

    /// Query/body fields allowed to carry repeated values.
    pub parameter_whitelist: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_headers: true,
            parameter_whitelist: [
                "duration",
                "ratingsQuantity",
                "ratingsAverage",
                "maxGroupSize",
                "price",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Static file configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StaticFilesConfig {
    pub enabled: bool,

    /// Directory served verbatim.
    pub dir: String,
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: "public".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total request deadline in seconds. Unset means no deadline.
    pub request_secs: Option<u64>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_limits() {
        let config = AppConfig::default();
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.rate_limit.window_secs, 3600);
        assert_eq!(config.body.json_limit, 10240);
        assert_eq!(config.body.webhook_path, "/webhook-checkout");
        assert_eq!(config.environment, Environment::Production);
        assert!(!config
            .security
            .parameter_whitelist
            .contains(&"difficulty".to_string()));
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            environment = "development"

            [rate_limit]
            max_requests = 5
            "#,
        )
        .unwrap();
        assert!(config.environment.is_development());
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.rate_limit.window_secs, 3600);
    }

    #[test]
    fn test_node_env_mapping() {
        assert_eq!(Environment::from_node_env("development"), Environment::Development);
        assert_eq!(Environment::from_node_env("staging"), Environment::Production);
        assert_eq!(Environment::from_node_env(""), Environment::Production);
    }
}
