//! Dispatch fan-out.
//!
//! Every normal subscriber owns a bounded FIFO queue drained by a dedicated
//! worker task, which keeps per-subscriber ordering and isolates failures.
//! Pre-sequence subscribers run inline before normal ones are scheduled.
//!
//! ```text
//!                      ┌─────────┐
//!                 ┌───▶│ queue A │──▶ worker A
//! ┌───────────┐   │    └─────────┘
//! │ publish() │───┤    ┌─────────┐
//! └───────────┘   └───▶│ queue B │──▶ worker B
//!                      └─────────┘
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, Level, debug, span, trace, warn};

use crate::error::{SessionError, SubscriberError};
use crate::model::Update;
use crate::report::ErrorReporter;
use crate::subscriber::{BoxedSubscriber, Sequence, Subscriber, SubscriptionHandle};

// =============================================================================
// Configuration
// =============================================================================

/// When a published update counts as handed off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    /// Once it is queued for every subscriber.
    #[default]
    Scheduled,
    /// Once every subscriber has finished with it.
    Completed,
}

/// Fan-out settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Hand-off guarantee.
    #[serde(default)]
    pub mode: DeliveryMode,

    /// Per-subscriber queue capacity. A full queue makes `publish` wait.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long a stopping session waits for queued deliveries, in milliseconds.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl DispatchConfig {
    /// Returns the drain limit as a duration.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::default(),
            queue_capacity: default_queue_capacity(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

fn default_queue_capacity() -> usize {
    256
}

fn default_drain_timeout_ms() -> u64 {
    30_000
}

// =============================================================================
// Outcomes
// =============================================================================

/// What happened to one update for one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Queued; the subscriber will see it later.
    Scheduled,
    /// The subscriber finished successfully.
    Completed,
    /// The subscriber failed. The failure has already been reported.
    Failed(SubscriberError),
    /// The subscriber's worker was gone.
    Dropped,
}

/// Per-subscriber outcomes of one [`Dispatcher::publish`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Published update.
    pub update_id: i64,
    /// Outcomes in subscriber registration order, pre-sequence first.
    pub outcomes: Vec<(SubscriptionHandle, DeliveryOutcome)>,
}

impl PublishReport {
    fn new(update_id: i64) -> Self {
        Self {
            update_id,
            outcomes: Vec::new(),
        }
    }

    /// Returns the outcome for one subscriber.
    pub fn outcome(&self, handle: SubscriptionHandle) -> Option<&DeliveryOutcome> {
        self.outcomes
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, outcome)| outcome)
    }

    /// Iterates over failed deliveries.
    pub fn failures(&self) -> impl Iterator<Item = (SubscriptionHandle, &SubscriberError)> {
        self.outcomes.iter().filter_map(|(handle, outcome)| match outcome {
            DeliveryOutcome::Failed(err) => Some((*handle, err)),
            _ => None,
        })
    }

    /// Returns the number of subscribers the update reached.
    pub fn delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| !matches!(outcome, DeliveryOutcome::Dropped))
            .count()
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

enum Delivery {
    Update {
        update: Arc<Update>,
        ack: Option<oneshot::Sender<Result<(), SubscriberError>>>,
    },
    Barrier(oneshot::Sender<()>),
}

struct Slot {
    handle: SubscriptionHandle,
    name: String,
    sequence: Sequence,
    subscriber: BoxedSubscriber,
    /// Lazily started so registration works outside a runtime.
    queue: Mutex<Option<mpsc::Sender<Delivery>>>,
}

struct Shared {
    config: DispatchConfig,
    slots: RwLock<Arc<Vec<Arc<Slot>>>>,
    /// Queues of removed subscribers whose workers may still hold deliveries.
    retired: Mutex<Vec<mpsc::Sender<Delivery>>>,
    next_id: AtomicU64,
    reporter: ErrorReporter,
}

/// Fans updates out to registered subscribers.
///
/// Cloning is cheap and clones share the subscriber list. Registration is
/// copy-on-write, so it is safe while a publish is in flight; the in-flight
/// publish keeps using the list it started with.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Creates a dispatcher with its own error reporter.
    pub fn new(config: DispatchConfig) -> Self {
        Self::with_reporter(config, ErrorReporter::default())
    }

    /// Creates a dispatcher reporting subscriber failures to `reporter`.
    pub fn with_reporter(config: DispatchConfig, reporter: ErrorReporter) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                slots: RwLock::new(Arc::new(Vec::new())),
                retired: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                reporter,
            }),
        }
    }

    /// Returns the fan-out settings.
    pub fn config(&self) -> &DispatchConfig {
        &self.shared.config
    }

    /// Returns the reporter receiving subscriber failures.
    pub fn reporter(&self) -> &ErrorReporter {
        &self.shared.reporter
    }

    /// Registers a normal subscriber.
    pub fn subscribe<S>(&self, name: impl Into<String>, subscriber: S) -> SubscriptionHandle
    where
        S: Subscriber + 'static,
    {
        self.subscribe_boxed(Sequence::Normal, name, Arc::new(subscriber))
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
        self.subscribe_boxed(sequence, name, Arc::new(subscriber))
    }

    /// Registers an already shared subscriber.
    pub fn subscribe_boxed(
        &self,
        sequence: Sequence,
        name: impl Into<String>,
        subscriber: BoxedSubscriber,
    ) -> SubscriptionHandle {
        let handle = SubscriptionHandle(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        debug!(subscriber = %name, handle = %handle, sequence = ?sequence, "Subscriber registered");

        let slot = Arc::new(Slot {
            handle,
            name,
            sequence,
            subscriber,
            queue: Mutex::new(None),
        });

        let mut slots = self.shared.slots.write();
        let mut next = Vec::with_capacity(slots.len() + 1);
        next.extend(slots.iter().cloned());
        next.push(slot);
        *slots = Arc::new(next);

        handle
    }

    /// Removes a subscriber. Updates already queued for it are still delivered.
    ///
    /// Returns false if the handle was not registered.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut slots = self.shared.slots.write();
        let Some(removed) = slots.iter().find(|slot| slot.handle == handle).cloned() else {
            return false;
        };
        let next = slots
            .iter()
            .filter(|slot| slot.handle != handle)
            .cloned()
            .collect();
        *slots = Arc::new(next);
        drop(slots);

        let sender = removed.queue.lock().clone();
        if let Some(sender) = sender {
            let mut retired = self.shared.retired.lock();
            retired.retain(|sender| !sender.is_closed());
            retired.push(sender);
        }
        debug!(handle = %handle, "Subscriber removed");
        true
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.shared.slots.read().len()
    }

    fn snapshot(&self) -> Arc<Vec<Arc<Slot>>> {
        Arc::clone(&self.shared.slots.read())
    }

    /// Delivers one update to every current subscriber.
    ///
    /// Returns once the update is handed off according to [`DeliveryMode`].
    /// Subscriber failures are isolated and show up in the report.
    pub async fn publish(&self, update: Arc<Update>) -> PublishReport {
        let span = span!(
            Level::DEBUG,
            "publish",
            update_id = update.update_id,
            kind = %update.field_name()
        );
        self.publish_inner(update).instrument(span).await
    }

    async fn publish_inner(&self, update: Arc<Update>) -> PublishReport {
        let slots = self.snapshot();
        let mut report = PublishReport::new(update.update_id);

        for slot in slots.iter().filter(|s| s.sequence == Sequence::Pre) {
            let result = invoke(
                &slot.name,
                &slot.subscriber,
                Arc::clone(&update),
                &self.shared.reporter,
            )
            .await;
            report.outcomes.push((slot.handle, into_outcome(result)));
        }

        let await_completion = self.shared.config.mode == DeliveryMode::Completed;
        let mut pending = Vec::new();

        for slot in slots.iter().filter(|s| s.sequence == Sequence::Normal) {
            let (ack, waiter) = if await_completion {
                let (tx, rx) = oneshot::channel();
                (Some(tx), Some(rx))
            } else {
                (None, None)
            };

            let delivery = Delivery::Update {
                update: Arc::clone(&update),
                ack,
            };
            if self.sender_for(slot).send(delivery).await.is_err() {
                warn!(subscriber = %slot.name, "Subscriber worker is gone, delivery dropped");
                report.outcomes.push((slot.handle, DeliveryOutcome::Dropped));
                continue;
            }

            match waiter {
                Some(rx) => pending.push((slot.handle, rx)),
                None => report.outcomes.push((slot.handle, DeliveryOutcome::Scheduled)),
            }
        }

        let completed = join_all(
            pending
                .into_iter()
                .map(|(handle, rx)| async move { (handle, rx.await) }),
        )
        .await;

        for (handle, result) in completed {
            let outcome = match result {
                Ok(result) => into_outcome(result),
                Err(_) => DeliveryOutcome::Dropped,
            };
            report.outcomes.push((handle, outcome));
        }

        trace!(outcomes = report.outcomes.len(), "Update published");
        report
    }

    /// Waits until every delivery queued so far has been processed.
    ///
    /// Covers subscribers removed since the last flush as well.
    pub async fn flush(&self) {
        let retired = std::mem::take(&mut *self.shared.retired.lock());
        let senders: Vec<_> = self
            .snapshot()
            .iter()
            .filter_map(|slot| slot.queue.lock().clone())
            .chain(retired)
            .collect();

        let mut waiters = Vec::new();
        for sender in senders {
            let (tx, rx) = oneshot::channel();
            if sender.send(Delivery::Barrier(tx)).await.is_ok() {
                waiters.push(rx);
            }
        }

        join_all(waiters).await;
    }

    /// Returns the queue of a normal subscriber, starting its worker on first use.
    fn sender_for(&self, slot: &Slot) -> mpsc::Sender<Delivery> {
        let mut queue = slot.queue.lock();
        if let Some(sender) = queue.as_ref()
            && !sender.is_closed()
        {
            return sender.clone();
        }

        let (tx, rx) = mpsc::channel(self.shared.config.queue_capacity.max(1));
        tokio::spawn(run_worker(
            slot.name.clone(),
            Arc::clone(&slot.subscriber),
            rx,
            self.shared.reporter.clone(),
        ));
        *queue = Some(tx.clone());
        tx
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatchConfig::default())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.shared.config)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

fn into_outcome(result: Result<(), SubscriberError>) -> DeliveryOutcome {
    match result {
        Ok(()) => DeliveryOutcome::Completed,
        Err(err) => DeliveryOutcome::Failed(err),
    }
}

async fn run_worker(
    name: String,
    subscriber: BoxedSubscriber,
    mut rx: mpsc::Receiver<Delivery>,
    reporter: ErrorReporter,
) {
    while let Some(delivery) = rx.recv().await {
        match delivery {
            Delivery::Update { update, ack } => {
                let result = invoke(&name, &subscriber, update, &reporter).await;
                if let Some(ack) = ack {
                    let _ = ack.send(result);
                }
            }
            Delivery::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!(subscriber = %name, "Subscriber worker finished");
}

async fn invoke(
    name: &str,
    subscriber: &BoxedSubscriber,
    update: Arc<Update>,
    reporter: &ErrorReporter,
) -> Result<(), SubscriberError> {
    let update_id = update.update_id;
    let result = match AssertUnwindSafe(subscriber.on_update(update))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => Err(SubscriberError::Panicked(panic_message(&*panic))),
    };

    if let Err(err) = &result {
        warn!(subscriber = %name, update_id, error = %err, "Subscriber failed");
        reporter.report(SessionError::Subscriber {
            subscriber: name.to_string(),
            update_id,
            source: err.clone(),
        });
    }
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Chat, Message, UpdateKind};
    use crate::subscriber::subscriber_fn;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn update(id: i64) -> Arc<Update> {
        Arc::new(Update::new(
            id,
            UpdateKind::Message(Message {
                message_id: id,
                chat: Chat {
                    id: 1,
                    kind: "private".into(),
                    ..Default::default()
                },
                ..Default::default()
            }),
        ))
    }

    fn recorder(seen: Arc<Mutex<Vec<i64>>>) -> impl Subscriber + 'static {
        subscriber_fn(move |update: Arc<Update>| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().push(update.update_id);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let dispatcher = Dispatcher::default();
        let report = dispatcher.publish(update(1)).await;
        assert_eq!(report.update_id, 1);
        assert!(report.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_received_order_preserved() {
        let dispatcher = Dispatcher::default();
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        dispatcher.subscribe("first", recorder(Arc::clone(&first)));
        dispatcher.subscribe("second", recorder(Arc::clone(&second)));

        for id in [5, 7, 6] {
            let report = dispatcher.publish(update(id)).await;
            assert!(
                report
                    .outcomes
                    .iter()
                    .all(|(_, o)| *o == DeliveryOutcome::Scheduled)
            );
        }
        dispatcher.flush().await;

        assert_eq!(*first.lock(), vec![5, 7, 6]);
        assert_eq!(*second.lock(), vec![5, 7, 6]);
    }

    #[tokio::test]
    async fn test_failing_subscriber_isolated() {
        let dispatcher = Dispatcher::new(DispatchConfig {
            mode: DeliveryMode::Completed,
            ..Default::default()
        });
        let mut errors = dispatcher.reporter().subscribe();

        let failing = dispatcher.subscribe(
            "failing",
            subscriber_fn(|_update: Arc<Update>| async { Err(SubscriberError::msg("boom")) }),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let healthy = dispatcher.subscribe("healthy", recorder(Arc::clone(&seen)));

        for id in 1..=3 {
            let report = dispatcher.publish(update(id)).await;
            assert_eq!(
                report.outcome(failing),
                Some(&DeliveryOutcome::Failed(SubscriberError::msg("boom")))
            );
            assert_eq!(report.outcome(healthy), Some(&DeliveryOutcome::Completed));
            assert_eq!(report.failures().count(), 1);
        }

        assert_eq!(*seen.lock(), vec![1, 2, 3]);
        let notified = errors.recv().await.unwrap();
        assert!(matches!(
            notified,
            SessionError::Subscriber { update_id: 1, ref subscriber, .. } if subscriber == "failing"
        ));
    }

    #[tokio::test]
    async fn test_panicking_subscriber_isolated() {
        let dispatcher = Dispatcher::new(DispatchConfig {
            mode: DeliveryMode::Completed,
            ..Default::default()
        });
        let panicking = dispatcher.subscribe(
            "panicking",
            subscriber_fn(|update: Arc<Update>| async move {
                if update.update_id == 1 {
                    panic!("bad update");
                }
                Ok(())
            }),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        dispatcher.subscribe("healthy", recorder(Arc::clone(&seen)));

        let report = dispatcher.publish(update(1)).await;
        assert_eq!(
            report.outcome(panicking),
            Some(&DeliveryOutcome::Failed(SubscriberError::Panicked(
                "bad update".into()
            )))
        );

        // The worker survives the panic.
        let report = dispatcher.publish(update(2)).await;
        assert_eq!(report.outcome(panicking), Some(&DeliveryOutcome::Completed));
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_scheduled_mode_does_not_wait() {
        let dispatcher = Dispatcher::default();
        let gate = Arc::new(Notify::new());
        let done = Arc::new(AtomicBool::new(false));

        let (g, d) = (Arc::clone(&gate), Arc::clone(&done));
        dispatcher.subscribe(
            "slow",
            subscriber_fn(move |_update: Arc<Update>| {
                let (g, d) = (Arc::clone(&g), Arc::clone(&d));
                async move {
                    g.notified().await;
                    d.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );

        let report = dispatcher.publish(update(1)).await;
        assert_eq!(report.delivered(), 1);
        assert!(!done.load(Ordering::SeqCst));

        gate.notify_one();
        dispatcher.flush().await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_completed_mode_waits() {
        let dispatcher = Dispatcher::new(DispatchConfig {
            mode: DeliveryMode::Completed,
            ..Default::default()
        });
        let done = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&done);
        dispatcher.subscribe(
            "slow",
            subscriber_fn(move |_update: Arc<Update>| {
                let d = Arc::clone(&d);
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    d.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );

        dispatcher.publish(update(1)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pre_sequence_runs_first() {
        let dispatcher = Dispatcher::new(DispatchConfig {
            mode: DeliveryMode::Completed,
            ..Default::default()
        });
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        dispatcher.subscribe(
            "normal",
            subscriber_fn(move |_update: Arc<Update>| {
                let o = Arc::clone(&o);
                async move {
                    o.lock().push("normal");
                    Ok(())
                }
            }),
        );
        let o = Arc::clone(&order);
        let pre = dispatcher.subscribe_with(
            Sequence::Pre,
            "pre",
            subscriber_fn(move |_update: Arc<Update>| {
                let o = Arc::clone(&o);
                async move {
                    o.lock().push("pre");
                    Ok(())
                }
            }),
        );

        let report = dispatcher.publish(update(1)).await;
        assert_eq!(report.outcomes[0].0, pre);
        assert_eq!(*order.lock(), vec!["pre", "normal"]);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let dispatcher = Dispatcher::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handle = dispatcher.subscribe("recorder", recorder(Arc::clone(&seen)));

        dispatcher.publish(update(1)).await;
        dispatcher.flush().await;

        assert!(dispatcher.unsubscribe(handle));
        assert!(!dispatcher.unsubscribe(handle));
        assert_eq!(dispatcher.subscriber_count(), 0);

        let report = dispatcher.publish(update(2)).await;
        assert!(report.outcomes.is_empty());
        assert_eq!(*seen.lock(), vec![1]);
    }

    #[tokio::test]
    async fn test_flush_waits_for_removed_subscriber() {
        let dispatcher = Dispatcher::default();
        let gate = Arc::new(Notify::new());
        let done = Arc::new(AtomicBool::new(false));

        let (g, d) = (Arc::clone(&gate), Arc::clone(&done));
        let handle = dispatcher.subscribe(
            "slow",
            subscriber_fn(move |_update: Arc<Update>| {
                let (g, d) = (Arc::clone(&g), Arc::clone(&d));
                async move {
                    g.notified().await;
                    d.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );

        dispatcher.publish(update(1)).await;
        assert!(dispatcher.unsubscribe(handle));

        let flushing = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.flush().await }
        });
        tokio::task::yield_now().await;
        assert!(!flushing.is_finished());

        gate.notify_one();
        flushing.await.unwrap();
        assert!(done.load(Ordering::SeqCst));

        // Retired queues are released by the flush that covered them.
        assert!(dispatcher.shared.retired.lock().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_during_publish() {
        let dispatcher = Dispatcher::new(DispatchConfig {
            mode: DeliveryMode::Completed,
            ..Default::default()
        });
        let late_seen = Arc::new(Mutex::new(Vec::new()));

        let inner = dispatcher.clone();
        let late = Arc::clone(&late_seen);
        let registered = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&registered);
        dispatcher.subscribe(
            "registrar",
            subscriber_fn(move |_update: Arc<Update>| {
                let inner = inner.clone();
                let late = Arc::clone(&late);
                let flag = Arc::clone(&flag);
                async move {
                    if !flag.swap(true, Ordering::SeqCst) {
                        inner.subscribe("late", recorder(late));
                    }
                    Ok(())
                }
            }),
        );

        dispatcher.publish(update(1)).await;
        dispatcher.publish(update(2)).await;

        assert_eq!(dispatcher.subscriber_count(), 2);
        assert_eq!(*late_seen.lock(), vec![2]);
    }
}
