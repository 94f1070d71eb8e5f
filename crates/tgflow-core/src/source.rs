//! Retrieval capability consumed by the poll loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::error::ApiResult;
use crate::model::User;

/// Parameters of one long-poll retrieval call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    /// First identifier to return. `None` returns whatever is unconfirmed.
    pub offset: Option<i64>,
    /// How long the platform may hold the request open waiting for updates.
    pub timeout: Duration,
    /// Maximum batch size, 1 to 100.
    pub limit: Option<u8>,
    /// Update kinds to receive. `None` keeps the platform's current setting.
    pub allowed_updates: Option<Vec<String>>,
}

impl FetchRequest {
    /// Creates a request starting at `offset` with the given wait.
    pub fn new(offset: Option<i64>, timeout: Duration) -> Self {
        Self {
            offset,
            timeout,
            ..Default::default()
        }
    }

    /// Builds the `getUpdates` parameter object.
    pub fn to_params(&self) -> Value {
        let mut params = Map::new();
        if let Some(offset) = self.offset {
            params.insert("offset".into(), json!(offset));
        }
        if let Some(limit) = self.limit {
            params.insert("limit".into(), json!(limit));
        }
        params.insert("timeout".into(), json!(self.timeout.as_secs()));
        if let Some(allowed) = &self.allowed_updates {
            params.insert("allowed_updates".into(), json!(allowed));
        }
        Value::Object(params)
    }
}

/// Source of raw updates for one bot.
///
/// Implementations perform the network call. Returned payloads must be in
/// platform delivery order. A call that outlives its deadline should return
/// [`ApiError::Timeout`](crate::ApiError::Timeout), which the poll loop treats
/// as an empty batch.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Retrieves the next batch of raw updates.
    async fn fetch_updates(&self, request: &FetchRequest) -> ApiResult<Vec<Value>>;

    /// Checks reachability and credentials, returning the bot's own identity.
    async fn probe(&self) -> ApiResult<User>;
}

/// Type-erased update source.
pub type BoxedUpdateSource = Arc<dyn UpdateSource>;
