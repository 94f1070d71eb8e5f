//! Poll cycle executor.
//!
//! One executor drives one session's retrieval loop:
//!
//! ```text
//! cursor.next_poll_start() ──▶ fetch_updates ──▶ decode ──▶ publish ──▶ cursor.advance_to(max)
//!          ▲                        │ error                                      │
//!          │                        ▼                                            │
//!          └──────────── backoff / retry_after sleep ◀───────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tgflow_core::{
    ApiError, BoxedUpdateSource, Dispatcher, ErrorReporter, FetchRequest, OffsetCursor,
    PlatformError, SessionError, UpdateDecoder, peek_update_id,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level, debug, error, info, span, trace, warn};

use crate::backoff::Backoff;
use crate::config::PollingConfig;

// =============================================================================
// Settings
// =============================================================================

/// What a stop request does with a retrieval call that is still pending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopPolicy {
    /// Drop the pending call. Nothing is lost: the platform only confirms
    /// updates through the offset of the next call.
    #[default]
    CancelFetch,
    /// Let the pending call return and dispatch its batch before exiting.
    AwaitFetch,
}

/// Retrieval parameters of a polling session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    /// Long-poll wait.
    pub timeout: Duration,
    pub limit: Option<u8>,
    pub allowed_updates: Option<Vec<String>>,
    pub stop_policy: StopPolicy,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

impl From<&PollingConfig> for PollSettings {
    fn from(config: &PollingConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            limit: config.limit,
            allowed_updates: config.allowed_updates.clone(),
            stop_policy: config.stop_policy,
        }
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A batch was decoded and handed off.
    Dispatched {
        /// Updates published.
        published: usize,
        /// Payloads skipped because they failed to decode.
        skipped: usize,
    },
    /// Nothing arrived before the long-poll wait ran out.
    Empty,
    /// A transient failure; retry after the delay.
    Retry(Duration),
    /// Stop was requested while the retrieval call was pending.
    Cancelled,
    /// The session cannot continue.
    Fatal(SessionError),
}

/// Why the poll loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// A stop was requested.
    Stopped,
    /// An unrecoverable error occurred.
    Failed(SessionError),
}

/// State handed back when the loop ends, so a restart resumes where it left off.
#[derive(Debug)]
pub struct PollExit {
    pub cursor: OffsetCursor,
    pub reason: LoopExit,
}

// =============================================================================
// Executor
// =============================================================================

/// Runs poll cycles for one session.
///
/// Owns the session's [`OffsetCursor`] and [`Backoff`] while the loop runs.
pub struct PollExecutor {
    session: String,
    source: BoxedUpdateSource,
    decoder: UpdateDecoder,
    dispatcher: Dispatcher,
    reporter: ErrorReporter,
    settings: PollSettings,
    cursor: OffsetCursor,
    backoff: Backoff,
    acked: Arc<watch::Sender<Option<i64>>>,
}

impl PollExecutor {
    /// Creates an executor.
    ///
    /// `acked` receives the cursor value after every advance.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: impl Into<String>,
        source: BoxedUpdateSource,
        decoder: UpdateDecoder,
        dispatcher: Dispatcher,
        reporter: ErrorReporter,
        settings: PollSettings,
        cursor: OffsetCursor,
        backoff: Backoff,
        acked: Arc<watch::Sender<Option<i64>>>,
    ) -> Self {
        Self {
            session: session.into(),
            source,
            decoder,
            dispatcher,
            reporter,
            settings,
            cursor,
            backoff,
            acked,
        }
    }

    /// Returns the cursor.
    pub fn cursor(&self) -> &OffsetCursor {
        &self.cursor
    }

    /// Returns the backoff state.
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Runs cycles until `cancel` fires or a fatal error occurs.
    ///
    /// A batch that has been received is always fully dispatched before the
    /// loop checks for cancellation again.
    pub async fn run(mut self, cancel: CancellationToken) -> PollExit {
        info!(
            session = %self.session,
            offset = ?self.cursor.next_poll_start(),
            "Poll loop started"
        );

        let reason = loop {
            if cancel.is_cancelled() {
                break LoopExit::Stopped;
            }

            match self.run_cycle(&cancel).await {
                CycleOutcome::Dispatched { .. } | CycleOutcome::Empty => {}
                CycleOutcome::Retry(delay) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break LoopExit::Stopped,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                CycleOutcome::Cancelled => break LoopExit::Stopped,
                CycleOutcome::Fatal(err) => {
                    error!(session = %self.session, error = %err, "Poll loop failed");
                    self.reporter.report(err.clone());
                    break LoopExit::Failed(err);
                }
            }
        };

        info!(session = %self.session, cursor = ?self.cursor.current(), "Poll loop exited");
        PollExit {
            cursor: self.cursor,
            reason,
        }
    }

    /// Runs one retrieval, dispatch and acknowledge cycle.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleOutcome {
        let request = FetchRequest {
            offset: self.cursor.next_poll_start(),
            timeout: self.settings.timeout,
            limit: self.settings.limit,
            allowed_updates: self.settings.allowed_updates.clone(),
        };
        trace!(session = %self.session, offset = ?request.offset, "Fetching updates");

        let source = Arc::clone(&self.source);
        let fetch = source.fetch_updates(&request);
        let result = match self.settings.stop_policy {
            StopPolicy::CancelFetch => tokio::select! {
                biased;
                _ = cancel.cancelled() => return CycleOutcome::Cancelled,
                result = fetch => result,
            },
            StopPolicy::AwaitFetch => fetch.await,
        };

        match result {
            Ok(batch) => {
                self.backoff.reset();
                if batch.is_empty() {
                    CycleOutcome::Empty
                } else {
                    self.dispatch_batch(batch).await
                }
            }
            Err(ApiError::Timeout) => {
                trace!(session = %self.session, "Long poll timed out");
                self.backoff.reset();
                CycleOutcome::Empty
            }
            Err(err) if err.is_fatal() => CycleOutcome::Fatal(err.into()),
            Err(ApiError::Platform(PlatformError::RateLimited {
                retry_after,
                description,
            })) => {
                warn!(
                    session = %self.session,
                    delay = ?retry_after,
                    reason = %description,
                    "Rate limited, waiting before the next poll"
                );
                self.reporter.report(PlatformError::RateLimited {
                    retry_after,
                    description,
                });
                CycleOutcome::Retry(retry_after)
            }
            Err(err) => {
                let delay = self.backoff.next_delay();
                if self.backoff.exhausted() {
                    warn!(
                        session = %self.session,
                        failures = self.backoff.failures(),
                        "Retry limit reached, giving up"
                    );
                    return CycleOutcome::Fatal(err.into());
                }
                warn!(
                    session = %self.session,
                    error = %err,
                    failures = self.backoff.failures(),
                    delay = ?delay,
                    "Poll failed, backing off"
                );
                self.reporter.report(err);
                CycleOutcome::Retry(delay)
            }
        }
    }

    /// Decodes and publishes a batch in received order, then advances the cursor.
    async fn dispatch_batch(&mut self, batch: Vec<Value>) -> CycleOutcome {
        let span = span!(Level::DEBUG, "batch", session = %self.session, size = batch.len());

        async {
            let mut max_id: Option<i64> = None;
            let mut published = 0;
            let mut skipped = 0;

            for raw in &batch {
                if let Some(id) = peek_update_id(raw) {
                    max_id = Some(max_id.map_or(id, |max| max.max(id)));
                }

                match self.decoder.decode(raw) {
                    Ok(update) => {
                        let report = self.dispatcher.publish(Arc::new(update)).await;
                        trace!(
                            update_id = report.update_id,
                            delivered = report.delivered(),
                            "Update handed off"
                        );
                        published += 1;
                    }
                    Err(err) => {
                        warn!(
                            update_id = ?err.update_id(),
                            error = %err,
                            "Skipping undecodable update"
                        );
                        self.reporter.report(err);
                        skipped += 1;
                    }
                }
            }

            match max_id {
                Some(id) => {
                    if let Err(err) = self.cursor.advance_to(id) {
                        return CycleOutcome::Fatal(err.into());
                    }
                    self.acked.send_replace(Some(id));
                    debug!(published, skipped, cursor = id, "Batch acknowledged");
                }
                None => {
                    error!(size = batch.len(), "Batch has no readable update_id, cursor unchanged");
                }
            }

            CycleOutcome::Dispatched { published, skipped }
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for PollExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollExecutor")
            .field("session", &self.session)
            .field("settings", &self.settings)
            .field("cursor", &self.cursor)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Recorder, ScriptedSource, Step, message};
    use serde_json::json;
    use tgflow_core::{DecodeError, InvalidCursorError};

    struct Harness {
        source: Arc<ScriptedSource>,
        executor: PollExecutor,
        seen: Arc<parking_lot::Mutex<Vec<i64>>>,
        dispatcher: Dispatcher,
        reporter: ErrorReporter,
    }

    fn harness(steps: Vec<Step>, cursor: OffsetCursor) -> Harness {
        harness_with(steps, cursor, Backoff::default())
    }

    fn harness_with(steps: Vec<Step>, cursor: OffsetCursor, backoff: Backoff) -> Harness {
        let source = ScriptedSource::new(steps);
        let reporter = ErrorReporter::default();
        let dispatcher = Dispatcher::with_reporter(Default::default(), reporter.clone());
        let (recorder, seen) = Recorder::new();
        dispatcher.subscribe("recorder", recorder);
        let (acked, _) = watch::channel(None);

        let executor = PollExecutor::new(
            "test",
            source.clone(),
            UpdateDecoder::default(),
            dispatcher.clone(),
            reporter.clone(),
            PollSettings {
                timeout: Duration::from_secs(1),
                ..Default::default()
            },
            cursor,
            backoff,
            Arc::new(acked),
        );

        Harness {
            source,
            executor,
            seen,
            dispatcher,
            reporter,
        }
    }

    #[tokio::test]
    async fn test_malformed_payload_is_skipped() {
        let batch = vec![
            message(10),
            json!({"update_id": 11, "message": "not an object"}),
            message(12),
        ];
        let mut h = harness(vec![Step::Batch(batch)], OffsetCursor::new());
        let cancel = CancellationToken::new();

        let outcome = h.executor.run_cycle(&cancel).await;
        h.dispatcher.flush().await;

        assert_eq!(
            outcome,
            CycleOutcome::Dispatched {
                published: 2,
                skipped: 1
            }
        );
        assert_eq!(*h.seen.lock(), vec![10, 12]);
        assert_eq!(h.executor.cursor().current(), Some(12));
        assert!(matches!(
            h.reporter.last(),
            Some(SessionError::Decode(DecodeError::InvalidPayload { update_id: 11, .. }))
        ));
    }

    #[tokio::test]
    async fn test_poisoned_tail_still_advances() {
        let batch = vec![message(20), json!({"update_id": 21, "message": [1, 2]})];
        let mut h = harness(vec![Step::Batch(batch), Step::Batch(vec![])], OffsetCursor::new());
        let cancel = CancellationToken::new();

        h.executor.run_cycle(&cancel).await;
        h.executor.run_cycle(&cancel).await;

        assert_eq!(h.executor.cursor().current(), Some(21));
        assert_eq!(h.source.offsets(), vec![None, Some(22)]);
    }

    #[tokio::test]
    async fn test_received_order_is_preserved() {
        let batch = vec![message(5), message(7), message(6)];
        let mut h = harness(vec![Step::Batch(batch)], OffsetCursor::new());

        h.executor.run_cycle(&CancellationToken::new()).await;
        h.dispatcher.flush().await;

        assert_eq!(*h.seen.lock(), vec![5, 7, 6]);
        assert_eq!(h.executor.cursor().current(), Some(7));
    }

    #[tokio::test]
    async fn test_cursor_is_monotonic_across_cycles() {
        let steps = vec![
            Step::Batch(vec![message(1), message(2)]),
            Step::Batch(vec![]),
            Step::Fail(ApiError::network("connection reset")),
            Step::Batch(vec![message(3)]),
        ];
        let mut h = harness(steps, OffsetCursor::starting_at(0));
        let cancel = CancellationToken::new();

        let mut observed = Vec::new();
        for _ in 0..4 {
            h.executor.run_cycle(&cancel).await;
            observed.push(h.executor.cursor().current());
        }

        assert_eq!(observed, vec![Some(2), Some(2), Some(2), Some(3)]);
        assert_eq!(h.source.offsets(), vec![Some(1), Some(3), Some(3), Some(3)]);
    }

    #[tokio::test]
    async fn test_network_failures_back_off() {
        let steps = vec![
            Step::Fail(ApiError::network("down")),
            Step::Fail(ApiError::network("down")),
            Step::Fail(ApiError::Platform(PlatformError::Conflict {
                description: "terminated by other getUpdates request".into(),
            })),
            Step::Batch(vec![]),
            Step::Fail(ApiError::network("down")),
        ];
        let mut h = harness(steps, OffsetCursor::new());
        let cancel = CancellationToken::new();

        let mut outcomes = Vec::new();
        for _ in 0..5 {
            outcomes.push(h.executor.run_cycle(&cancel).await);
        }

        assert_eq!(
            outcomes,
            vec![
                CycleOutcome::Retry(Duration::from_secs(1)),
                CycleOutcome::Retry(Duration::from_secs(2)),
                CycleOutcome::Retry(Duration::from_secs(4)),
                CycleOutcome::Empty,
                CycleOutcome::Retry(Duration::from_secs(1)),
            ]
        );
    }

    #[tokio::test]
    async fn test_timeout_counts_as_empty() {
        let steps = vec![
            Step::Fail(ApiError::network("down")),
            Step::Fail(ApiError::Timeout),
        ];
        let mut h = harness(steps, OffsetCursor::new());
        let cancel = CancellationToken::new();

        h.executor.run_cycle(&cancel).await;
        assert_eq!(h.executor.backoff().failures(), 1);

        assert_eq!(h.executor.run_cycle(&cancel).await, CycleOutcome::Empty);
        assert_eq!(h.executor.backoff().failures(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_uses_retry_after() {
        let steps = vec![Step::Fail(ApiError::Platform(PlatformError::RateLimited {
            retry_after: Duration::from_secs(9),
            description: "Too Many Requests".into(),
        }))];
        let mut h = harness(steps, OffsetCursor::new());

        let outcome = h.executor.run_cycle(&CancellationToken::new()).await;

        assert_eq!(outcome, CycleOutcome::Retry(Duration::from_secs(9)));
        assert_eq!(h.executor.backoff().failures(), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_is_fatal() {
        let err = ApiError::Platform(PlatformError::Unauthorized {
            code: 401,
            description: "Unauthorized".into(),
        });
        let h = harness(vec![Step::Fail(err.clone())], OffsetCursor::new());

        let exit = h.executor.run(CancellationToken::new()).await;

        assert_eq!(exit.reason, LoopExit::Failed(SessionError::Api(err.clone())));
        assert_eq!(h.reporter.last(), Some(SessionError::Api(err)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_limit_fails_loop() {
        let steps = vec![
            Step::Fail(ApiError::network("down")),
            Step::Fail(ApiError::network("down")),
            Step::Fail(ApiError::network("still down")),
            Step::Batch(vec![message(1)]),
        ];
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(1), 1.0)
            .with_max_retries(Some(2));
        let h = harness_with(steps, OffsetCursor::new(), backoff);

        let exit = h.executor.run(CancellationToken::new()).await;

        let err = SessionError::Api(ApiError::network("still down"));
        assert_eq!(exit.reason, LoopExit::Failed(err.clone()));
        assert_eq!(h.reporter.last(), Some(err));
        assert_eq!(h.source.offsets().len(), 3);
        assert!(h.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cursor_regression_is_fatal() {
        let mut h = harness(vec![Step::Batch(vec![message(3)])], OffsetCursor::starting_at(9));

        let outcome = h.executor.run_cycle(&CancellationToken::new()).await;

        assert_eq!(
            outcome,
            CycleOutcome::Fatal(SessionError::InvalidCursor(InvalidCursorError {
                current: 9,
                requested: 3
            }))
        );
        assert_eq!(h.executor.cursor().current(), Some(9));
    }

    #[tokio::test]
    async fn test_cancel_drops_pending_fetch() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let h = harness(
            vec![Step::Gated(gate, vec![message(1)])],
            OffsetCursor::new(),
        );
        let cancel = CancellationToken::new();
        let source = h.source.clone();

        let task = tokio::spawn(h.executor.run(cancel.clone()));
        source.wait_for_requests(1).await;
        cancel.cancel();

        let exit = task.await.unwrap();
        assert_eq!(exit.reason, LoopExit::Stopped);
        assert_eq!(exit.cursor.current(), None);
        assert!(h.seen.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_sleeps_for_retry_after() {
        let steps = vec![
            Step::Fail(ApiError::Platform(PlatformError::RateLimited {
                retry_after: Duration::from_secs(5),
                description: "slow down".into(),
            })),
            Step::Batch(vec![message(1)]),
        ];
        let h = harness(steps, OffsetCursor::new());
        let cancel = CancellationToken::new();
        let source = h.source.clone();
        let started = tokio::time::Instant::now();

        let task = tokio::spawn(h.executor.run(cancel.clone()));
        source.wait_for_requests(2).await;
        assert!(started.elapsed() >= Duration::from_secs(5));

        cancel.cancel();
        let exit = task.await.unwrap();
        assert_eq!(exit.cursor.current(), Some(1));
    }
}
