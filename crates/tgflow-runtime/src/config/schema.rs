//! Configuration schema definitions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tgflow_core::{DEFAULT_SERVER, DecoderConfig, DispatchConfig, HttpClientConfig};

use crate::poller::StopPolicy;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TgflowConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Individual bot session configurations.
    #[serde(default)]
    pub sessions: Vec<SessionConfig>,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Returns the level as a filter directive string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Converts to a `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to `full` otherwise.
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Appends to `logging.file_path`.
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global log level. `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file for `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Include thread IDs in log lines.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line in log lines.
    #[serde(default)]
    pub file_location: bool,

    /// Per-module level overrides, e.g. `tgflow_core = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

// =============================================================================
// Sessions
// =============================================================================

/// One bot session.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique identifier for this session.
    pub id: String,

    /// Bot token issued by the platform.
    pub token: String,

    /// Bot API server base URL.
    #[serde(default = "default_server")]
    pub server: String,

    /// Whether this session is started by the runtime.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Timeout for ordinary API calls in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Long-poll settings. `null` runs the session in push-only mode.
    #[serde(default = "default_polling")]
    pub polling: Option<PollingConfig>,

    /// Backoff after transient failures.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Fan-out settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Decoder settings.
    #[serde(default)]
    pub decoder: DecoderConfig,
}

impl SessionConfig {
    /// Creates a polling session config with default settings.
    pub fn new(id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            token: token.into(),
            server: default_server(),
            enabled: default_enabled(),
            request_timeout_secs: default_request_timeout_secs(),
            polling: default_polling(),
            retry: RetryConfig::default(),
            dispatch: DispatchConfig::default(),
            decoder: DecoderConfig::default(),
        }
    }

    /// Builds the HTTP client settings for this session.
    pub fn client_config(&self) -> HttpClientConfig {
        HttpClientConfig::new(self.token.clone())
            .with_server(self.server.clone())
            .with_timeout(Duration::from_secs(self.request_timeout_secs))
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("id", &self.id)
            .field("token", &"<redacted>")
            .field("server", &self.server)
            .field("enabled", &self.enabled)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("polling", &self.polling)
            .field("retry", &self.retry)
            .field("dispatch", &self.dispatch)
            .field("decoder", &self.decoder)
            .finish()
    }
}

fn default_server() -> String {
    DEFAULT_SERVER.to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_polling() -> Option<PollingConfig> {
    Some(PollingConfig::default())
}

/// Long-poll retrieval settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// How long the platform may hold a retrieval call open, in seconds.
    #[serde(default = "default_poll_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum batch size (1-100). Unset uses the platform default.
    #[serde(default)]
    pub limit: Option<u8>,

    /// Update kinds to receive. Unset keeps the platform's current setting.
    #[serde(default)]
    pub allowed_updates: Option<Vec<String>>,

    /// What `stop()` does with a pending retrieval call.
    #[serde(default)]
    pub stop_policy: StopPolicy,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_poll_timeout_secs(),
            limit: None,
            allowed_updates: None,
            stop_policy: StopPolicy::default(),
        }
    }
}

fn default_poll_timeout_secs() -> u64 {
    30
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay after the first failure in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound for the delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Consecutive retries before the session gives up. Unlimited when unset.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_retries: None,
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}
