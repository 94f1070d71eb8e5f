//! tgflow runtime - session lifecycle and orchestration.
//!
//! This crate turns the pieces in `tgflow-core` into running bots:
//!
//! - Poll loop with exponential backoff ([`PollExecutor`], [`Backoff`])
//! - Per-bot lifecycle control ([`Session`], [`SessionState`])
//! - Multi-session hosting ([`SessionManager`], [`TgflowRuntime`])
//! - Configuration loading and logging setup
//!
//! ```ignore
//! use tgflow_runtime::TgflowRuntime;
//! use tgflow_core::subscriber_fn;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = TgflowRuntime::new()?;
//!
//!     if let Some(session) = runtime.session("echo").await {
//!         session.subscribe("log", subscriber_fn(|update| async move {
//!             tracing::info!(update_id = update.update_id, "got update");
//!             Ok(())
//!         }));
//!     }
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Session States
//!
//! A session moves `Idle -> Starting -> Running -> Stopping -> Stopped`, or
//! to `Failed` when its credentials are rejected or its cursor would move
//! backwards. Transient network failures do not leave `Running`; the poll
//! loop backs off and retries instead, unless a retry limit is configured
//! and runs out. Both `Stopped` and `Failed` sessions
//! can be started again and resume from their last acknowledged update.

pub mod backoff;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod manager;
pub mod poller;
pub mod runtime;
pub mod session;

#[cfg(test)]
mod testing;

// Re-exports
pub use backoff::Backoff;
pub use config::{ConfigError, ConfigLoader, ConfigResult, SessionConfig, TgflowConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use lifecycle::{BoxedLifecycle, Lifecycle, SessionHealth, SessionState};
pub use logging::{LoggingBuilder, SpanEvents};
pub use manager::{ManagerStats, SessionManager};
pub use poller::{CycleOutcome, LoopExit, PollExecutor, PollExit, PollSettings, StopPolicy};
pub use runtime::{RuntimeBuilder, TgflowRuntime};
pub use session::{Session, SessionBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for application code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
