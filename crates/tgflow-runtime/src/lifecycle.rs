//! Lifecycle capability shared by sessions and whatever hosts them.

use std::sync::Arc;

use async_trait::async_trait;
use tgflow_core::model::User;
use tgflow_core::{SessionError, SessionResult};

/// Lifecycle state of a session.
///
/// ```text
/// Idle ─▶ Starting ─▶ Running ─▶ Stopping ─▶ Stopped
///            │           │                      │
///            └───────────┴─────▶ Failed ◀───────┘ (restart via start())
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Never started.
    #[default]
    Idle,
    /// Checking credentials.
    Starting,
    /// Accepting updates.
    Running,
    /// Draining the poll loop.
    Stopping,
    /// Stopped on request.
    Stopped,
    /// Stopped by an unrecoverable error.
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Point-in-time health of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionHealth {
    pub state: SessionState,
    pub last_error: Option<SessionError>,
    /// Highest update identifier acknowledged to the platform.
    pub last_update_id: Option<i64>,
    /// Bot identity returned by the last successful credential check.
    pub bot: Option<User>,
}

/// What a host needs to drive a session.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Returns the session identifier.
    fn id(&self) -> &str;

    /// Starts the session. A no-op if it is already starting or running.
    async fn start(&self) -> SessionResult<()>;

    /// Stops the session, draining the poll loop. A no-op if nothing runs.
    async fn stop(&self) -> SessionResult<()>;

    /// Returns the current state.
    fn status(&self) -> SessionState;

    /// Returns the most recent reported error.
    fn last_error(&self) -> Option<SessionError>;
}

/// Type-erased lifecycle.
pub type BoxedLifecycle = Arc<dyn Lifecycle>;

#[async_trait]
impl<T: Lifecycle + ?Sized> Lifecycle for Arc<T> {
    fn id(&self) -> &str {
        (**self).id()
    }

    async fn start(&self) -> SessionResult<()> {
        (**self).start().await
    }

    async fn stop(&self) -> SessionResult<()> {
        (**self).stop().await
    }

    fn status(&self) -> SessionState {
        (**self).status()
    }

    fn last_error(&self) -> Option<SessionError> {
        (**self).last_error()
    }
}
