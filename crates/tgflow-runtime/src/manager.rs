//! Registry of independently running sessions.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tgflow_core::SessionError;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::lifecycle::{BoxedLifecycle, Lifecycle, SessionState};

/// Owns a set of sessions keyed by identifier.
///
/// Sessions never share state through the manager; it only fans lifecycle
/// calls out to them. `S` is the handle type stored, so a host can keep
/// concrete sessions and still get them back by identifier.
#[derive(Clone)]
pub struct SessionManager<S = BoxedLifecycle> {
    sessions: Arc<RwLock<HashMap<String, S>>>,
}

impl<S> Default for SessionManager<S> {
    fn default() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<S: Lifecycle + Clone> SessionManager<S> {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session under its own identifier.
    pub async fn register(&self, session: S) -> RuntimeResult<()> {
        let id = session.id().to_string();
        let mut sessions = self.sessions.write().await;

        if sessions.contains_key(&id) {
            return Err(RuntimeError::SessionExists(id));
        }

        sessions.insert(id.clone(), session);
        debug!(session = %id, "Registered session");
        Ok(())
    }

    /// Stops and removes a session.
    pub async fn unregister(&self, id: &str) -> RuntimeResult<S> {
        let session = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| RuntimeError::SessionNotFound(id.to_string()))?;

        session.stop().await?;
        info!(session = %id, "Unregistered session");
        Ok(session)
    }

    /// Gets a session by identifier.
    pub async fn get(&self, id: &str) -> Option<S> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Returns all session identifiers.
    pub async fn ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Returns the number of registered sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Returns every registered session.
    pub async fn sessions(&self) -> Vec<S> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Starts every session concurrently.
    ///
    /// One session failing does not affect the others; failures are returned.
    pub async fn start_all(&self) -> Vec<(String, SessionError)> {
        let sessions = self.sessions().await;
        info!("Starting {} session(s)", sessions.len());

        let results = join_all(sessions.iter().map(|s| async move {
            (s.id().to_string(), s.start().await)
        }))
        .await;

        collect_failures(results, "start")
    }

    /// Stops every session concurrently, waiting for each to drain.
    pub async fn stop_all(&self) -> Vec<(String, SessionError)> {
        let sessions = self.sessions().await;
        info!("Stopping {} session(s)", sessions.len());

        let results = join_all(sessions.iter().map(|s| async move {
            (s.id().to_string(), s.stop().await)
        }))
        .await;

        collect_failures(results, "stop")
    }

    /// Gets the state of every session.
    pub async fn status_all(&self) -> HashMap<String, SessionState> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(id, s)| (id.clone(), s.status()))
            .collect()
    }

    /// Returns statistics about the registered sessions.
    pub async fn stats(&self) -> ManagerStats {
        let sessions = self.sessions.read().await;
        let mut stats = ManagerStats {
            total: sessions.len(),
            ..Default::default()
        };

        for session in sessions.values() {
            match session.status() {
                SessionState::Idle => stats.idle += 1,
                SessionState::Starting => stats.starting += 1,
                SessionState::Running => stats.running += 1,
                SessionState::Stopping => stats.stopping += 1,
                SessionState::Stopped => stats.stopped += 1,
                SessionState::Failed => stats.failed += 1,
            }
        }

        stats
    }
}

fn collect_failures(
    results: Vec<(String, Result<(), SessionError>)>,
    action: &str,
) -> Vec<(String, SessionError)> {
    results
        .into_iter()
        .filter_map(|(id, result)| match result {
            Ok(()) => None,
            Err(err) => {
                warn!(session = %id, error = %err, "Failed to {action} session");
                Some((id, err))
            }
        })
        .collect()
}

impl<S: Lifecycle> FromIterator<S> for SessionManager<S> {
    /// Later sessions replace earlier ones with the same identifier.
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let sessions = iter
            .into_iter()
            .map(|s| (s.id().to_string(), s))
            .collect();
        Self {
            sessions: Arc::new(RwLock::new(sessions)),
        }
    }
}

impl<S> std::fmt::Debug for SessionManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager").finish_non_exhaustive()
    }
}

/// Statistics about the session manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Total number of sessions.
    pub total: usize,
    pub idle: usize,
    pub starting: usize,
    pub running: usize,
    pub stopping: usize,
    pub stopped: usize,
    pub failed: usize,
}

impl std::fmt::Display for ManagerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Sessions: {} total ({} running, {} failed, {} stopped, {} idle)",
            self.total, self.running, self.failed, self.stopped, self.idle
        )
    }
}
