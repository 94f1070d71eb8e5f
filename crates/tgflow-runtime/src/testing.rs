//! Scripted in-memory update source for tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tgflow_core::model::User;
use tgflow_core::{
    ApiError, ApiResult, FetchRequest, Subscriber, SubscriberError, Update, UpdateSource,
};
use tokio::sync::Notify;

/// One scripted answer to a retrieval call.
pub enum Step {
    /// Returns the payloads.
    Batch(Vec<Value>),
    /// Fails with the error.
    Fail(ApiError),
    /// Waits for the notify, then returns the payloads.
    Gated(Arc<Notify>, Vec<Value>),
}

/// Plays back a script of retrieval results.
///
/// Once the script runs out every call waits briefly and returns an empty batch.
pub struct ScriptedSource {
    steps: Mutex<VecDeque<Step>>,
    probes: Mutex<VecDeque<ApiResult<User>>>,
    check_gate: Mutex<Option<Arc<Notify>>>,
    pub requests: Mutex<Vec<FetchRequest>>,
    pub probe_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            probes: Mutex::new(VecDeque::new()),
            check_gate: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            probe_calls: AtomicUsize::new(0),
        })
    }

    /// Queues a probe result. Without one the probe succeeds.
    pub fn push_probe(&self, result: ApiResult<User>) {
        self.probes.lock().push_back(result);
    }

    /// Makes every credential check wait for the notify first.
    pub fn gate_credential_check(&self, gate: Arc<Notify>) {
        *self.check_gate.lock() = Some(gate);
    }

    pub fn offsets(&self) -> Vec<Option<i64>> {
        self.requests.lock().iter().map(|r| r.offset).collect()
    }

    /// Waits until at least `count` retrieval calls have been made.
    pub async fn wait_for_requests(&self, count: usize) {
        while self.requests.lock().len() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[async_trait]
impl UpdateSource for ScriptedSource {
    async fn fetch_updates(&self, request: &FetchRequest) -> ApiResult<Vec<Value>> {
        self.requests.lock().push(request.clone());

        let step = self.steps.lock().pop_front();
        match step {
            Some(Step::Batch(batch)) => Ok(batch),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Gated(gate, batch)) => {
                gate.notified().await;
                Ok(batch)
            }
            None => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn probe(&self) -> ApiResult<User> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.check_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let scripted = self.probes.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(bot_user()))
    }
}

pub fn bot_user() -> User {
    User {
        id: 42,
        is_bot: true,
        first_name: "Test".into(),
        username: Some("test_bot".into()),
        ..Default::default()
    }
}

/// A raw text message update.
pub fn message(update_id: i64) -> Value {
    json!({
        "update_id": update_id,
        "message": {
            "message_id": update_id * 10,
            "date": 0,
            "chat": {"id": 1, "type": "private"},
            "text": format!("#{update_id}")
        }
    })
}

/// Records the identifiers it sees.
pub struct Recorder {
    pub seen: Arc<Mutex<Vec<i64>>>,
}

impl Recorder {
    pub fn new() -> (Self, Arc<Mutex<Vec<i64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                seen: Arc::clone(&seen),
            },
            seen,
        )
    }
}

#[async_trait]
impl Subscriber for Recorder {
    async fn on_update(&self, update: Arc<Update>) -> Result<(), SubscriberError> {
        self.seen.lock().push(update.update_id);
        Ok(())
    }
}
