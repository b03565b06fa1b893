//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → loader.rs (NODE_ENV / PORT overrides)
//!     → AppConfig (validated, immutable)
//!     → handed to the pipeline builder
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - The environment is read once here, never inside request handling

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{apply_env_overrides, load_config, ConfigError};
pub use schema::{
    AppConfig, BodyConfig, Environment, ListenerConfig, RateLimitConfig, SecurityConfig,
};
