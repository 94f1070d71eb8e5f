//! Configuration module for the tgflow runtime.
//!
//! Loads logging settings and per-session bot settings from TOML/YAML files
//! and `TGFLOW_*` environment variables, then validates them.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    LogFormat, LogLevel, LogOutput, LoggingConfig, PollingConfig, RetryConfig, SessionConfig,
    SpanEventConfig, TgflowConfig,
};
pub use validation::validate_config;
