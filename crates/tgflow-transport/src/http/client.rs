//! reqwest based Bot API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use tgflow_core::model::User;
use tgflow_core::{
    ApiCaller, ApiError, ApiResponse, ApiResult, FetchRequest, HttpClientConfig, PlatformError,
    UpdateSource,
};

/// Bot API client over HTTPS.
///
/// Implements both [`UpdateSource`] (long-poll retrieval) and [`ApiCaller`]
/// (outbound actions). Cloning is cheap; clones share the connection pool.
#[derive(Clone)]
pub struct HttpBotClient {
    client: Client,
    config: HttpClientConfig,
}

impl HttpBotClient {
    /// Creates a client for the given configuration.
    pub fn new(config: HttpClientConfig) -> ApiResult<Self> {
        let client = ClientBuilder::new()
            .build()
            .map_err(|e| ApiError::network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a client reusing an existing reqwest client.
    pub fn with_client(client: Client, config: HttpClientConfig) -> Self {
        Self { client, config }
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    async fn request(&self, method: &str, params: &Value, timeout: Duration) -> ApiResult<Value> {
        trace!(method = %method, timeout = ?timeout, "Calling Bot API");

        let response = self
            .client
            .post(self.config.method_url(method))
            .json(params)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        let body = response.bytes().await.map_err(map_request_error)?;
        let result = parse_envelope(status, &body);

        if let Err(e) = &result {
            debug!(method = %method, status = status.as_u16(), error = %e, "Bot API call failed");
        }
        result
    }
}

impl std::fmt::Debug for HttpBotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBotClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl UpdateSource for HttpBotClient {
    async fn fetch_updates(&self, request: &FetchRequest) -> ApiResult<Vec<Value>> {
        let deadline = request.timeout + self.config.poll_slack;
        let result = self
            .request("getUpdates", &request.to_params(), deadline)
            .await?;
        match result {
            Value::Array(updates) => Ok(updates),
            other => Err(ApiError::invalid_response(format!(
                "getUpdates returned {} instead of an array",
                json_kind(&other)
            ))),
        }
    }

    async fn probe(&self) -> ApiResult<User> {
        let result = self
            .request("getMe", &json!({}), self.config.timeout)
            .await?;
        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait]
impl ApiCaller for HttpBotClient {
    async fn call(&self, method: &str, params: Value) -> ApiResult<Value> {
        self.request(method, &params, self.config.timeout).await
    }
}

// =============================================================================
// Response Mapping
// =============================================================================

/// Maps a reqwest failure, dropping the URL since it embeds the token.
fn map_request_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::network(err.without_url().to_string())
    }
}

/// Interprets a response body, falling back to the status code when the
/// body is not a Bot API envelope.
fn parse_envelope(status: StatusCode, body: &[u8]) -> ApiResult<Value> {
    match serde_json::from_slice::<ApiResponse<Value>>(body) {
        Ok(mut envelope) => {
            if !envelope.ok && envelope.error_code.is_none() {
                envelope.error_code = Some(i64::from(status.as_u16()));
            }
            envelope.into_result()
        }
        Err(e) if status.is_success() => Err(ApiError::invalid_response(e.to_string())),
        Err(_) if status.is_server_error() => {
            warn!(status = status.as_u16(), "Bot API server error");
            Err(ApiError::network(format!("server returned HTTP {}", status.as_u16())))
        }
        Err(_) => Err(PlatformError::from_response(
            Some(i64::from(status.as_u16())),
            status.canonical_reason().map(str::to_string),
            None,
        )
        .into()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const TOKEN: &str = "123:abc";

    fn client_for(server: &MockServer) -> HttpBotClient {
        let config = HttpClientConfig::new(TOKEN)
            .with_server(server.base_url())
            .with_poll_slack(Duration::from_secs(1));
        HttpBotClient::new(config).unwrap()
    }

    #[test]
    fn test_parse_success() {
        let body = br#"{"ok":true,"result":[{"update_id":1}]}"#;
        let value = parse_envelope(StatusCode::OK, body).unwrap();
        assert_eq!(value, json!([{"update_id": 1}]));
    }

    #[test]
    fn test_parse_unauthorized() {
        let body = br#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#;
        let err = parse_envelope(StatusCode::UNAUTHORIZED, body).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_parse_status_fills_missing_code() {
        let body = br#"{"ok":false,"description":"Conflict: terminated by other getUpdates request"}"#;
        let err = parse_envelope(StatusCode::CONFLICT, body).unwrap_err();
        assert!(matches!(
            err,
            ApiError::Platform(PlatformError::Conflict { .. })
        ));
    }

    #[test]
    fn test_parse_non_json_bodies() {
        assert!(matches!(
            parse_envelope(StatusCode::BAD_GATEWAY, b"<html>"),
            Err(ApiError::Network(_))
        ));
        assert!(matches!(
            parse_envelope(StatusCode::NOT_FOUND, b"not found"),
            Err(ApiError::Platform(PlatformError::Unauthorized { code: 404, .. }))
        ));
        assert!(matches!(
            parse_envelope(StatusCode::OK, b"garbage"),
            Err(ApiError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_updates_posts_params() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/bot123:abc/getUpdates")
                    .json_body(json!({"offset": 5, "timeout": 0}));
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"ok":true,"result":[{"update_id":5,"message":{"message_id":1,"date":0,"chat":{"id":1,"type":"private"}}}]}"#);
            })
            .await;

        let client = client_for(&server);
        let updates = client
            .fetch_updates(&FetchRequest::new(Some(5), Duration::ZERO))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0]["update_id"], 5);
    }

    #[tokio::test]
    async fn test_rate_limit_envelope() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/bot123:abc/sendMessage");
                then.status(429)
                    .header("content-type", "application/json")
                    .body(r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 7","parameters":{"retry_after":7}}"#);
            })
            .await;

        let client = client_for(&server);
        let err = client
            .call("sendMessage", json!({"chat_id": 1, "text": "hi"}))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "rate limited for 7s: Too Many Requests: retry after 7"
        );
    }

    #[tokio::test]
    async fn test_probe_returns_identity() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/bot123:abc/getMe");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"ok":true,"result":{"id":42,"is_bot":true,"first_name":"Echo","username":"echo_bot"}}"#);
            })
            .await;

        let me = client_for(&server).probe().await.unwrap();
        assert_eq!(me.id, 42);
        assert_eq!(me.username.as_deref(), Some("echo_bot"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let config = HttpClientConfig::new(TOKEN).with_server("http://127.0.0.1:1");
        let client = HttpBotClient::new(config).unwrap();
        let err = client.probe().await.unwrap_err();
        assert!(matches!(err, ApiError::Network(ref msg) if !msg.contains(TOKEN)));
    }
}
