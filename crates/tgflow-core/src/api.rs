//! Action capability and the platform response envelope.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::{ApiError, ApiResult, PlatformError};
use crate::model::{Message, User};

/// Invokes platform methods by name.
#[async_trait]
pub trait ApiCaller: Send + Sync {
    /// Calls `method` with a JSON parameter object and returns the `result` field.
    async fn call(&self, method: &str, params: Value) -> ApiResult<Value>;
}

/// Type-erased API caller.
pub type BoxedApiCaller = Arc<dyn ApiCaller>;

// =============================================================================
// Response Envelope
// =============================================================================

/// Extra information attached to an unsuccessful response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResponseParameters {
    /// The group was migrated to a supergroup with this identifier.
    #[serde(default)]
    pub migrate_to_chat_id: Option<i64>,
    /// Seconds to wait before repeating the request.
    #[serde(default)]
    pub retry_after: Option<u64>,
}

/// The `{ok, result, description, error_code, parameters}` wrapper around every response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub parameters: Option<ResponseParameters>,
}

impl<T> ApiResponse<T> {
    /// Unwraps the result or classifies the failure.
    pub fn into_result(self) -> ApiResult<T> {
        if self.ok {
            return self
                .result
                .ok_or_else(|| ApiError::invalid_response("successful response without result"));
        }
        let retry_after = self.parameters.and_then(|p| p.retry_after);
        Err(PlatformError::from_response(self.error_code, self.description, retry_after).into())
    }
}

// =============================================================================
// Typed Helpers
// =============================================================================

/// Typed wrapper over an [`ApiCaller`] for the common outbound actions.
#[derive(Clone)]
pub struct BotApi {
    caller: BoxedApiCaller,
}

impl BotApi {
    /// Wraps a caller.
    pub fn new(caller: BoxedApiCaller) -> Self {
        Self { caller }
    }

    /// Calls any method and deserializes its result.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> ApiResult<T> {
        let value = self.caller.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Returns the bot's own user.
    pub async fn get_me(&self) -> ApiResult<User> {
        self.call("getMe", json!({})).await
    }

    /// Sends a text message.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> ApiResult<Message> {
        self.call("sendMessage", json!({"chat_id": chat_id, "text": text}))
            .await
    }

    /// Sends a text message replying to `message`, in the same thread.
    pub async fn reply_to(&self, message: &Message, text: &str) -> ApiResult<Message> {
        let mut params = json!({
            "chat_id": message.chat.id,
            "text": text,
            "reply_parameters": {"message_id": message.message_id},
        });
        if let Some(thread) = message.message_thread_id {
            params["message_thread_id"] = json!(thread);
        }
        self.call("sendMessage", params).await
    }

    /// Deletes a message.
    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> ApiResult<bool> {
        self.call(
            "deleteMessage",
            json!({"chat_id": chat_id, "message_id": message_id}),
        )
        .await
    }

    /// Answers a callback query, optionally showing a notification.
    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> ApiResult<bool> {
        let mut params = json!({"callback_query_id": callback_query_id});
        if let Some(text) = text {
            params["text"] = json!(text);
        }
        self.call("answerCallbackQuery", params).await
    }
}

impl std::fmt::Debug for BotApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotApi").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[test]
    fn test_envelope_success() {
        let response: ApiResponse<Vec<Value>> =
            serde_json::from_value(json!({"ok": true, "result": [{"update_id": 1}]})).unwrap();
        assert_eq!(response.into_result().unwrap().len(), 1);
    }

    #[test]
    fn test_envelope_missing_result() {
        let response: ApiResponse<bool> = serde_json::from_value(json!({"ok": true})).unwrap();
        assert!(matches!(
            response.into_result(),
            Err(ApiError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_envelope_rate_limited() {
        let response: ApiResponse<Value> = serde_json::from_value(json!({
            "ok": false,
            "error_code": 429,
            "description": "Too Many Requests: retry after 3",
            "parameters": {"retry_after": 3}
        }))
        .unwrap();
        let err = response.into_result().unwrap_err();
        assert_eq!(
            err,
            ApiError::Platform(PlatformError::RateLimited {
                retry_after: Duration::from_secs(3),
                description: "Too Many Requests: retry after 3".into(),
            })
        );
    }

    struct Recording {
        calls: Mutex<Vec<(String, Value)>>,
        reply: Value,
    }

    #[async_trait]
    impl ApiCaller for Recording {
        async fn call(&self, method: &str, params: Value) -> ApiResult<Value> {
            self.calls.lock().push((method.to_string(), params));
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn test_reply_to_builds_params() {
        let caller = Arc::new(Recording {
            calls: Mutex::new(Vec::new()),
            reply: json!({"message_id": 2, "date": 0, "chat": {"id": 7, "type": "private"}}),
        });
        let api = BotApi::new(caller.clone());

        let incoming: Message = serde_json::from_value(json!({
            "message_id": 1,
            "message_thread_id": 3,
            "date": 0,
            "chat": {"id": 7, "type": "supergroup"}
        }))
        .unwrap();
        let sent = api.reply_to(&incoming, "pong").await.unwrap();
        assert_eq!(sent.message_id, 2);

        let calls = caller.calls.lock();
        assert_eq!(calls[0].0, "sendMessage");
        assert_eq!(
            calls[0].1,
            json!({
                "chat_id": 7,
                "text": "pong",
                "reply_parameters": {"message_id": 1},
                "message_thread_id": 3
            })
        );
    }
}
