//! Subscriber capability and registration handles.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SubscriberError;
use crate::model::Update;

/// Consumes updates delivered by a [`Dispatcher`](crate::Dispatcher).
///
/// Each subscriber sees updates one at a time, in the order they were
/// received. A returned error is logged and reported; it never reaches the
/// poll loop or other subscribers.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Handles one update.
    async fn on_update(&self, update: Arc<Update>) -> Result<(), SubscriberError>;
}

/// Type-erased subscriber.
pub type BoxedSubscriber = Arc<dyn Subscriber>;

/// Where a subscriber runs relative to the rest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Sequence {
    /// Runs inline in the dispatching task, in registration order, before
    /// normal subscribers are scheduled. Keep these fast: they hold up the poll loop.
    Pre,
    /// Runs on its own worker task.
    #[default]
    Normal,
}

/// Identifies a registration for [`Dispatcher::unsubscribe`](crate::Dispatcher::unsubscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(pub(crate) u64);

impl SubscriptionHandle {
    /// Returns the numeric registration id.
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A subscriber backed by an async closure.
pub struct FnSubscriber<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Subscriber for FnSubscriber<F>
where
    F: Fn(Arc<Update>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), SubscriberError>> + Send + 'static,
{
    async fn on_update(&self, update: Arc<Update>) -> Result<(), SubscriberError> {
        (self.f)(update).await
    }
}

/// Wraps an async closure as a [`Subscriber`].
///
/// # Example
///
/// ```rust,ignore
/// dispatcher.subscribe("logger", subscriber_fn(|update| async move {
///     tracing::info!(update_id = update.update_id, "got update");
///     Ok(())
/// }));
/// ```
pub fn subscriber_fn<F, Fut>(f: F) -> FnSubscriber<F>
where
    F: Fn(Arc<Update>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), SubscriberError>> + Send + 'static,
{
    FnSubscriber { f }
}
