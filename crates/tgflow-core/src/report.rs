//! Error notification channel shared by the executor and the fan-out.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::SessionError;

const DEFAULT_CAPACITY: usize = 64;

/// Records the last reported error and broadcasts every report.
///
/// Reports never block. Slow receivers lose the oldest notifications
/// (see [`broadcast::error::RecvError::Lagged`]).
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    last: Arc<Mutex<Option<SessionError>>>,
    tx: broadcast::Sender<SessionError>,
}

impl ErrorReporter {
    /// Creates a reporter buffering up to `capacity` notifications per receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            last: Arc::new(Mutex::new(None)),
            tx,
        }
    }

    /// Records and broadcasts an error.
    pub fn report(&self, error: impl Into<SessionError>) {
        let error = error.into();
        *self.last.lock() = Some(error.clone());
        // No receivers is fine.
        let _ = self.tx.send(error);
    }

    /// Returns the most recent error.
    pub fn last(&self) -> Option<SessionError> {
        self.last.lock().clone()
    }

    /// Forgets the most recent error.
    pub fn clear(&self) {
        *self.last.lock() = None;
    }

    /// Subscribes to future notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionError> {
        self.tx.subscribe()
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, DecodeError};

    #[tokio::test]
    async fn test_report_and_receive() {
        let reporter = ErrorReporter::default();
        let mut rx = reporter.subscribe();

        reporter.report(DecodeError::NotAnObject);
        reporter.report(ApiError::Timeout);

        assert_eq!(reporter.last(), Some(SessionError::Api(ApiError::Timeout)));
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionError::Decode(DecodeError::NotAnObject)
        );
        assert_eq!(rx.recv().await.unwrap(), SessionError::Api(ApiError::Timeout));

        reporter.clear();
        assert_eq!(reporter.last(), None);
    }
}
