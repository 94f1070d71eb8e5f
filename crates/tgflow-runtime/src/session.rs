//! Session lifecycle controller.
//!
//! A [`Session`] is one bot's independent polling and dispatch context. It
//! owns the cursor, the subscriber list and the poll task, and nothing in it
//! is shared with other sessions.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tgflow_core::model::User;
use tgflow_core::{
    BotApi, BoxedApiCaller, BoxedUpdateSource, DecoderConfig, DispatchConfig, Dispatcher,
    ErrorReporter, OffsetCursor, PublishReport, Sequence, SessionError, SessionResult, Subscriber,
    SubscriptionHandle, UpdateDecoder,
};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::config::SessionConfig;
use crate::lifecycle::{Lifecycle, SessionHealth, SessionState};
use crate::poller::{LoopExit, PollExecutor, PollExit, PollSettings};

/// Poll task bookkeeping, guarded so lifecycle operations never interleave.
struct Control {
    /// Cursor to resume from when no loop is running.
    cursor: OffsetCursor,
    task: Option<JoinHandle<PollExit>>,
    cancel: Option<CancellationToken>,
}

struct Inner {
    id: String,
    source: BoxedUpdateSource,
    api: Option<BotApi>,
    decoder: UpdateDecoder,
    dispatcher: Dispatcher,
    reporter: ErrorReporter,
    polling: Option<PollSettings>,
    backoff: Backoff,
    state: Arc<watch::Sender<SessionState>>,
    acked: Arc<watch::Sender<Option<i64>>>,
    bot: parking_lot::Mutex<Option<User>>,
    control: Mutex<Control>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(cancel) = self.control.get_mut().cancel.take() {
            cancel.cancel();
        }
    }
}

/// One bot session.
///
/// Cloning is cheap; clones control the same session.
///
/// # Example
///
/// ```rust,ignore
/// let session = Session::builder("echo", client.clone()).api(client).build();
/// session.subscribe("log", subscriber_fn(|update| async move {
///     tracing::info!(update_id = update.update_id, "update");
///     Ok(())
/// }));
/// session.start().await?;
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Starts building a session around an update source.
    pub fn builder(id: impl Into<String>, source: BoxedUpdateSource) -> SessionBuilder {
        SessionBuilder::new(id, source)
    }

    /// Returns the session identifier.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Returns the current state.
    pub fn status(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Returns a receiver notified on every state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Returns the most recent reported error.
    pub fn last_error(&self) -> Option<SessionError> {
        self.inner.reporter.last()
    }

    /// Subscribes to error notifications.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<SessionError> {
        self.inner.reporter.subscribe()
    }

    /// Returns the highest update identifier acknowledged to the platform.
    pub fn last_update_id(&self) -> Option<i64> {
        *self.inner.acked.borrow()
    }

    /// Returns the bot identity from the last successful start.
    pub fn bot(&self) -> Option<User> {
        self.inner.bot.lock().clone()
    }

    /// Returns the outbound API, if one was configured.
    pub fn api(&self) -> Option<&BotApi> {
        self.inner.api.as_ref()
    }

    /// Returns the session's fan-out.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Returns a health snapshot.
    pub fn health(&self) -> SessionHealth {
        SessionHealth {
            state: self.status(),
            last_error: self.last_error(),
            last_update_id: self.last_update_id(),
            bot: self.bot(),
        }
    }

    // =========================================================================
    // Subscribers
    // =========================================================================

    /// Registers a subscriber. Safe while the session runs.
    pub fn subscribe<S>(&self, name: impl Into<String>, subscriber: S) -> SubscriptionHandle
    where
        S: Subscriber + 'static,
    {
        self.inner.dispatcher.subscribe(name, subscriber)
    }

    /// Registers a subscriber in the given sequence.
    pub fn subscribe_with<S>(
        &self,
        sequence: Sequence,
        name: impl Into<String>,
        subscriber: S,
    ) -> SubscriptionHandle
    where
        S: Subscriber + 'static,
    {
        self.inner.dispatcher.subscribe_with(sequence, name, subscriber)
    }

    /// Removes a subscriber.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.inner.dispatcher.unsubscribe(handle)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    fn set_state(&self, state: SessionState) {
        let old = self.inner.state.send_replace(state);
        if old != state {
            debug!(
                session = %self.inner.id,
                old_state = %old,
                new_state = %state,
                "Session state changed"
            );
        }
    }

    /// Collects a finished poll task so its cursor carries over.
    async fn reclaim(&self, control: &mut Control) {
        control.cancel = None;
        if let Some(task) = control.task.take() {
            match task.await {
                Ok(exit) => control.cursor = exit.cursor,
                Err(err) => error!(session = %self.inner.id, error = %err, "Poll task panicked"),
            }
        }
    }

    /// Waits until a concurrent stop has settled the session.
    async fn wait_while_stopping(&self) {
        let mut state = self.watch_state();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = state.wait_for(|s| *s != SessionState::Stopping).await;
    }

    /// Starts the session.
    ///
    /// Checks credentials, then launches the poll loop (unless the session
    /// is push-only). A no-op if the session is already starting or running,
    /// and waits for a stop in progress first. A failed check moves the
    /// session to `Failed` and is returned. A stop issued during the check
    /// wins: the session stays `Stopped` and no loop is launched.
    ///
    /// The control lock is released during the credential check.
    pub async fn start(&self) -> SessionResult<()> {
        loop {
            let mut control = self.inner.control.lock().await;
            match self.status() {
                state @ (SessionState::Starting | SessionState::Running) => {
                    debug!(session = %self.inner.id, state = %state, "Session already started");
                    return Ok(());
                }
                SessionState::Stopping => {
                    drop(control);
                    self.wait_while_stopping().await;
                }
                _ => {
                    self.reclaim(&mut control).await;
                    self.set_state(SessionState::Starting);
                    break;
                }
            }
        }
        info!(session = %self.inner.id, "Starting session");

        let me = match self.inner.source.probe().await {
            Ok(me) => me,
            Err(err) => {
                let err = SessionError::from(err);
                error!(session = %self.inner.id, error = %err, "Credential check failed");
                self.inner.reporter.report(err.clone());
                self.inner.state.send_if_modified(|state| {
                    let starting = *state == SessionState::Starting;
                    if starting {
                        *state = SessionState::Failed;
                    }
                    starting
                });
                return Err(err);
            }
        };
        info!(
            session = %self.inner.id,
            bot_id = me.id,
            username = ?me.username,
            "Credentials verified"
        );
        *self.inner.bot.lock() = Some(me);
        self.inner.reporter.clear();

        let mut control = self.inner.control.lock().await;
        if self.status() != SessionState::Starting {
            info!(session = %self.inner.id, "Stopped during start, poll loop not launched");
            return Ok(());
        }
        self.set_state(SessionState::Running);

        let Some(settings) = &self.inner.polling else {
            info!(session = %self.inner.id, "Session running in push-only mode");
            return Ok(());
        };

        let cancel = CancellationToken::new();
        let executor = PollExecutor::new(
            self.inner.id.clone(),
            Arc::clone(&self.inner.source),
            self.inner.decoder.clone(),
            self.inner.dispatcher.clone(),
            self.inner.reporter.clone(),
            settings.clone(),
            control.cursor,
            self.inner.backoff.clone(),
            Arc::clone(&self.inner.acked),
        );

        let state = Arc::clone(&self.inner.state);
        let token = cancel.clone();
        control.task = Some(tokio::spawn(async move {
            let exit = executor.run(token).await;
            if matches!(exit.reason, LoopExit::Failed(_)) {
                state.send_if_modified(|state| {
                    let running = *state == SessionState::Running;
                    if running {
                        *state = SessionState::Failed;
                    }
                    running
                });
            }
            exit
        }));
        control.cancel = Some(cancel);

        info!(session = %self.inner.id, "Session started");
        Ok(())
    }

    /// Stops the session.
    ///
    /// Cancels the poll loop, waits for its current cycle to finish and
    /// drains queued deliveries for at most the configured drain timeout.
    /// Stopping a session that is still checking credentials moves it
    /// straight to `Stopped`. A no-op otherwise unless the session is running.
    ///
    /// The control lock is not held while the poll task winds down.
    pub async fn stop(&self) -> SessionResult<()> {
        let (task, cancel) = {
            let mut control = self.inner.control.lock().await;
            match self.status() {
                SessionState::Running => {}
                SessionState::Starting => {
                    self.set_state(SessionState::Stopped);
                    info!(session = %self.inner.id, "Session stopped before it started");
                    return Ok(());
                }
                state => {
                    debug!(session = %self.inner.id, state = %state, "Session is not running");
                    return Ok(());
                }
            }

            self.set_state(SessionState::Stopping);
            (control.task.take(), control.cancel.take())
        };
        info!(session = %self.inner.id, "Stopping session");

        if let Some(cancel) = cancel {
            cancel.cancel();
        }

        let mut final_state = SessionState::Stopped;
        if let Some(task) = task {
            match task.await {
                Ok(exit) => {
                    self.inner.control.lock().await.cursor = exit.cursor;
                    if matches!(exit.reason, LoopExit::Failed(_)) {
                        final_state = SessionState::Failed;
                    }
                }
                Err(err) => {
                    error!(session = %self.inner.id, error = %err, "Poll task panicked");
                    final_state = SessionState::Failed;
                }
            }
        }

        let limit = self.inner.dispatcher.config().drain_timeout();
        if tokio::time::timeout(limit, self.inner.dispatcher.flush())
            .await
            .is_err()
        {
            warn!(
                session = %self.inner.id,
                limit = ?limit,
                "Subscribers still busy after drain timeout, no longer waiting"
            );
            self.inner.reporter.report(SessionError::DrainTimeout(limit));
        }

        self.set_state(final_state);
        info!(session = %self.inner.id, state = %final_state, "Session stopped");
        Ok(())
    }

    /// Decodes and publishes one pushed update, e.g. from a webhook.
    ///
    /// Requires the session to be running. The cursor is not touched.
    pub async fn push_update(&self, raw: Value) -> SessionResult<PublishReport> {
        if self.status() != SessionState::Running {
            return Err(SessionError::NotRunning);
        }

        let update = self.inner.decoder.decode(&raw).map_err(|err| {
            warn!(session = %self.inner.id, error = %err, "Rejecting undecodable pushed update");
            self.inner.reporter.report(err.clone());
            SessionError::from(err)
        })?;

        Ok(self.inner.dispatcher.publish(Arc::new(update)).await)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("state", &self.status())
            .field("polling", &self.inner.polling)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Lifecycle for Session {
    fn id(&self) -> &str {
        Session::id(self)
    }

    async fn start(&self) -> SessionResult<()> {
        Session::start(self).await
    }

    async fn stop(&self) -> SessionResult<()> {
        Session::stop(self).await
    }

    fn status(&self) -> SessionState {
        Session::status(self)
    }

    fn last_error(&self) -> Option<SessionError> {
        Session::last_error(self)
    }
}

// =============================================================================
// SessionBuilder
// =============================================================================

/// Builder for [`Session`].
pub struct SessionBuilder {
    id: String,
    source: BoxedUpdateSource,
    api: Option<BoxedApiCaller>,
    decoder: DecoderConfig,
    dispatch: DispatchConfig,
    polling: Option<PollSettings>,
    backoff: Backoff,
    initial_offset: Option<i64>,
}

impl SessionBuilder {
    /// Creates a builder for a polling session with default settings.
    pub fn new(id: impl Into<String>, source: BoxedUpdateSource) -> Self {
        Self {
            id: id.into(),
            source,
            api: None,
            decoder: DecoderConfig::default(),
            dispatch: DispatchConfig::default(),
            polling: Some(PollSettings::default()),
            backoff: Backoff::default(),
            initial_offset: None,
        }
    }

    /// Creates a builder with every setting taken from `config`.
    pub fn from_config(config: &SessionConfig, source: BoxedUpdateSource) -> Self {
        Self {
            id: config.id.clone(),
            source,
            api: None,
            decoder: config.decoder.clone(),
            dispatch: config.dispatch.clone(),
            polling: config.polling.as_ref().map(PollSettings::from),
            backoff: Backoff::from(&config.retry),
            initial_offset: None,
        }
    }

    /// Sets the outbound API caller exposed through [`Session::api`].
    pub fn api(mut self, caller: BoxedApiCaller) -> Self {
        self.api = Some(caller);
        self
    }

    /// Sets the decoder settings.
    pub fn decoder(mut self, config: DecoderConfig) -> Self {
        self.decoder = config;
        self
    }

    /// Sets the fan-out settings.
    pub fn dispatch(mut self, config: DispatchConfig) -> Self {
        self.dispatch = config;
        self
    }

    /// Sets the long-poll settings.
    pub fn polling(mut self, settings: PollSettings) -> Self {
        self.polling = Some(settings);
        self
    }

    /// Disables polling; updates arrive only through [`Session::push_update`].
    pub fn push_only(mut self) -> Self {
        self.polling = None;
        self
    }

    /// Sets the backoff schedule for transient failures.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Resumes after a previously acknowledged update identifier.
    pub fn initial_offset(mut self, update_id: i64) -> Self {
        self.initial_offset = Some(update_id);
        self
    }

    /// Builds the session in the `Idle` state.
    pub fn build(self) -> Session {
        let reporter = ErrorReporter::default();
        let dispatcher = Dispatcher::with_reporter(self.dispatch, reporter.clone());
        let cursor = self
            .initial_offset
            .map_or_else(OffsetCursor::new, OffsetCursor::starting_at);
        let (state, _) = watch::channel(SessionState::Idle);
        let (acked, _) = watch::channel(cursor.current());

        Session {
            inner: Arc::new(Inner {
                id: self.id,
                source: self.source,
                api: self.api.map(BotApi::new),
                decoder: UpdateDecoder::new(self.decoder),
                dispatcher,
                reporter,
                polling: self.polling,
                backoff: self.backoff,
                state: Arc::new(state),
                acked: Arc::new(acked),
                bot: parking_lot::Mutex::new(None),
                control: Mutex::new(Control {
                    cursor,
                    task: None,
                    cancel: None,
                }),
            }),
        }
    }
}
