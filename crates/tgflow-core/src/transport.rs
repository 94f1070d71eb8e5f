//! Configuration types for transport implementations.

use std::time::Duration;

/// Default Bot API server.
pub const DEFAULT_SERVER: &str = "https://api.telegram.org";

// =============================================================================
// HTTP Client Config
// =============================================================================

/// Configuration for the HTTP Bot API client.
#[derive(Clone)]
pub struct HttpClientConfig {
    /// API server base URL, without trailing slash.
    pub server: String,
    /// Bot token. Never logged.
    pub token: String,
    /// Timeout for ordinary method calls.
    pub timeout: Duration,
    /// Added to the long-poll wait to get the retrieval request timeout.
    pub poll_slack: Duration,
}

impl HttpClientConfig {
    /// Creates a config for `token` against the default server.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            token: token.into(),
            timeout: Duration::from_secs(30),
            poll_slack: Duration::from_secs(5),
        }
    }

    /// Sets the API server base URL.
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the timeout for ordinary method calls.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the slack added on top of long-poll waits.
    pub fn with_poll_slack(mut self, slack: Duration) -> Self {
        self.poll_slack = slack;
        self
    }

    /// Returns the URL for `method`.
    pub fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.server, self.token, method)
    }
}

impl std::fmt::Debug for HttpClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClientConfig")
            .field("server", &self.server)
            .field("token", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("poll_slack", &self.poll_slack)
            .finish()
    }
}
