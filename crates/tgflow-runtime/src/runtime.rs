//! Top-level orchestration of configured sessions.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use tgflow_runtime::TgflowRuntime;
//!
//! // Loads tgflow.toml from the current directory plus TGFLOW_* variables
//! let runtime = TgflowRuntime::new()?;
//!
//! // Custom configuration path
//! let runtime = TgflowRuntime::builder()
//!     .config_file("config/bots.toml")
//!     .profile("production")
//!     .build()?;
//!
//! runtime.run().await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::signal;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::{ConfigLoader, TgflowConfig};
use crate::error::RuntimeResult;
use crate::lifecycle::SessionHealth;
use crate::logging;
use crate::manager::{ManagerStats, SessionManager};
use crate::session::Session;

/// Hosts every session of one process.
///
/// Sessions come from configuration or are added programmatically. Each one
/// runs independently; a failing session never stops the others.
///
/// ```rust,ignore
/// let runtime = TgflowRuntime::new()?;
/// let session = runtime.session("echo").await.expect("configured");
/// session.subscribe("echo", subscriber_fn(|update| async move { Ok(()) }));
/// runtime.run().await?;
/// ```
pub struct TgflowRuntime {
    config: TgflowConfig,
    manager: SessionManager<Session>,
    running: Arc<RwLock<bool>>,
}

impl TgflowRuntime {
    /// Creates a runtime from `tgflow.*` in the current directory and the
    /// environment.
    pub fn new() -> RuntimeResult<Self> {
        Self::builder().build()
    }

    /// Creates a runtime builder for custom configuration.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from loaded configuration.
    ///
    /// Initializes logging and builds one session per enabled entry. Nothing
    /// is started until [`start`](Self::start) or [`run`](Self::run).
    pub fn from_config(config: &TgflowConfig) -> RuntimeResult<Self> {
        logging::init_from_config(&config.logging);

        let mut sessions = Vec::new();
        for session_config in &config.sessions {
            if !session_config.enabled {
                info!(session = %session_config.id, "Session disabled, skipping");
                continue;
            }

            #[cfg(feature = "http-client")]
            {
                let client = Arc::new(tgflow_transport::HttpBotClient::new(
                    session_config.client_config(),
                )?);
                let session =
                    crate::session::SessionBuilder::from_config(session_config, client.clone())
                        .api(client)
                        .build();
                sessions.push(session);
            }

            #[cfg(not(feature = "http-client"))]
            warn!(
                session = %session_config.id,
                "Session needs the http-client feature, skipping"
            );
        }

        info!(
            log_level = %config.logging.level,
            sessions = sessions.len(),
            "Runtime initialized from configuration"
        );

        Ok(Self {
            config: config.clone(),
            manager: sessions.into_iter().collect(),
            running: Arc::new(RwLock::new(false)),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &TgflowConfig {
        &self.config
    }

    /// Returns the session manager.
    pub fn manager(&self) -> &SessionManager<Session> {
        &self.manager
    }

    /// Returns whether the runtime is currently running.
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    // =========================================================================
    // Session Management
    // =========================================================================

    /// Adds a session. Started right away if the runtime is running.
    ///
    /// A session that fails to start is not kept.
    pub async fn add_session(&self, session: Session) -> RuntimeResult<()> {
        self.manager.register(session.clone()).await?;
        info!(session = %session.id(), "Added session");

        if self.is_running().await
            && let Err(err) = session.start().await
        {
            warn!(session = %session.id(), error = %err, "Session failed to start, removing it");
            // A concurrent remove_session may have taken it already.
            let _ = self.manager.unregister(session.id()).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Stops and removes a session.
    pub async fn remove_session(&self, id: &str) -> RuntimeResult<Session> {
        self.manager.unregister(id).await
    }

    /// Gets a session by identifier.
    pub async fn session(&self, id: &str) -> Option<Session> {
        self.manager.get(id).await
    }

    /// Returns a health snapshot of every session.
    pub async fn health(&self) -> HashMap<String, SessionHealth> {
        self.manager
            .sessions()
            .await
            .into_iter()
            .map(|s| (s.id().to_string(), s.health()))
            .collect()
    }

    /// Returns session statistics.
    pub async fn stats(&self) -> ManagerStats {
        self.manager.stats().await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts every session. Sessions that fail to start are logged and
    /// left in `Failed`; the rest keep running.
    pub async fn start(&self) -> RuntimeResult<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Runtime is already running");
                return Ok(());
            }
            *running = true;
        }

        info!("Starting tgflow runtime");

        for (id, err) in self.manager.start_all().await {
            error!(session = %id, error = %err, "Failed to start session");
        }

        info!(stats = %self.stats().await, "Runtime started");
        Ok(())
    }

    /// Stops every session, draining in-flight batches.
    pub async fn stop(&self) -> RuntimeResult<()> {
        {
            let mut running = self.running.write().await;
            if !*running {
                warn!("Runtime is not running");
                return Ok(());
            }
            *running = false;
        }

        info!("Stopping tgflow runtime");

        for (id, err) in self.manager.stop_all().await {
            error!(session = %id, error = %err, "Error during session shutdown");
        }

        info!("Runtime stopped");
        Ok(())
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;

        info!("tgflow runtime is now running. Press Ctrl+C to stop.");
        wait_for_shutdown().await;

        self.stop().await
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await
    }
}

impl std::fmt::Debug for TgflowRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TgflowRuntime")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Waits for Ctrl+C or, on Unix, SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                }
                return;
            }
            Err(err) => warn!(error = %err, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(err) => error!(error = %err, "Failed to listen for Ctrl+C, shutting down"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`TgflowRuntime`] with custom configuration.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    /// Creates a builder searching the current directory.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    /// Loads a specific configuration file.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g. "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Enables `TGFLOW_*` environment variables (enabled by default).
    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    /// Disables environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges configuration programmatically, overriding files and environment.
    pub fn merge(mut self, config: TgflowConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Loads the configuration and builds the runtime.
    pub fn build(self) -> RuntimeResult<TgflowRuntime> {
        let config = self.config_loader.load()?;
        TgflowRuntime::from_config(&config)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
