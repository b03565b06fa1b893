//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (window > 0, limits > 0)
//! - Validate path shapes (prefixes start with '/')
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::AppConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    let rl = &config.rate_limit;
    if rl.enabled {
        if rl.max_requests == 0 {
            errors.push(ValidationError::new("rate_limit.max_requests", "must be greater than 0"));
        }
        if rl.window_secs == 0 {
            errors.push(ValidationError::new("rate_limit.window_secs", "must be greater than 0"));
        }
        if !rl.path_prefix.starts_with('/') {
            errors.push(ValidationError::new("rate_limit.path_prefix", "must start with '/'"));
        }
    }

    let body = &config.body;
    if body.json_limit == 0 {
        errors.push(ValidationError::new("body.json_limit", "must be greater than 0"));
    }
    if body.urlencoded_limit == 0 {
        errors.push(ValidationError::new("body.urlencoded_limit", "must be greater than 0"));
    }
    if body.raw_limit == 0 {
        errors.push(ValidationError::new("body.raw_limit", "must be greater than 0"));
    }
    if body.passthrough_limit == 0 {
        errors.push(ValidationError::new("body.passthrough_limit", "must be greater than 0"));
    }
    if !body.webhook_path.starts_with('/') || body.webhook_path.len() < 2 {
        errors.push(ValidationError::new(
            "body.webhook_path",
            "must be an absolute path other than '/'",
        ));
    }
    if body.webhook_content_type.trim().is_empty() {
        errors.push(ValidationError::new("body.webhook_content_type", "must not be empty"));
    }

    if config
        .security
        .parameter_whitelist
        .iter()
        .any(|f| f.trim().is_empty())
    {
        errors.push(ValidationError::new(
            "security.parameter_whitelist",
            "entries must not be empty",
        ));
    }

    if config.static_files.enabled && config.static_files.dir.trim().is_empty() {
        errors.push(ValidationError::new("static_files.dir", "must not be empty"));
    }

    if config.timeouts.request_secs == Some(0) {
        errors.push(ValidationError::new(
            "timeouts.request_secs",
            "must be greater than 0 when set",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
