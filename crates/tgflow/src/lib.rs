//! # tgflow
//!
//! Update acquisition and dispatch for Telegram-style bot APIs.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐      ┌──────────────┐      ┌────────────┐      ┌─────────────┐
//! │  TgflowRuntime │─────▶│   Session    │─────▶│ Dispatcher │─────▶│ Subscribers │
//! │ (many bots)    │      │ (poll loop)  │      │ (fan-out)  │      │ (own queue) │
//! └────────────────┘      └──────────────┘      └────────────┘      └─────────────┘
//!                                │ getUpdates
//!                                ▼
//!                         ┌──────────────┐
//!                         │ HttpBotClient│
//!                         └──────────────┘
//! ```
//!
//! - **Runtime**: loads configuration, hosts sessions, handles shutdown signals
//! - **Session**: one bot's credential check, poll loop and offset cursor
//! - **Dispatcher**: ordered delivery to subscribers, isolated from each other
//! - **Transport**: the HTTP client behind retrieval and outbound calls
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tgflow::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Arc::new(HttpBotClient::new(HttpClientConfig::new(token))?);
//!     let session = Session::builder("echo", client.clone()).api(client).build();
//!
//!     let api = session.api().cloned().expect("api configured");
//!     session.subscribe("echo", subscriber_fn(move |update| {
//!         let api = api.clone();
//!         async move {
//!             if let UpdateKind::Message(message) = &update.kind {
//!                 api.reply_to(message, message.text.as_deref().unwrap_or("")).await?;
//!             }
//!             Ok(())
//!         }
//!     }));
//!
//!     let runtime = TgflowRuntime::from_config(&TgflowConfig::default())?;
//!     runtime.add_session(session).await?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default): read `tgflow.toml`
//! - `yaml-config`: read `tgflow.yaml`
//! - `http-client` (default): reqwest-based transport
//! - `json-log`: JSON log output

pub use tgflow_core as core;
pub use tgflow_runtime as runtime;
pub use tgflow_transport as transport;

/// Commonly used types for building bots.
///
/// ```rust,ignore
/// use tgflow::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    // Runtime and sessions
    pub use tgflow_runtime::{
        Session, SessionBuilder, SessionState, TgflowConfig, TgflowRuntime,
    };

    // Model
    pub use tgflow_core::model::*;

    // Dispatch
    pub use tgflow_core::{
        DeliveryMode, DispatchConfig, Dispatcher, Sequence, Subscriber, SubscriberError,
        SubscriptionHandle, subscriber_fn,
    };

    // Outbound calls
    pub use tgflow_core::{ApiError, BotApi, HttpClientConfig};

    #[cfg(feature = "http-client")]
    pub use tgflow_transport::HttpBotClient;
}
