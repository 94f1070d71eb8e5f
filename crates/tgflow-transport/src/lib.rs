//! # tgflow Transport
//!
//! Network implementations of the capabilities defined in `tgflow-core`.
//!
//! ## Features
//!
//! - `http-client`: reqwest based Bot API client ([`HttpBotClient`])
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  tgflow-runtime     │  (sessions, poll loop)
//! ├─────────────────────┤
//! │  tgflow-core        │  (UpdateSource / ApiCaller traits)
//! ├─────────────────────┤
//! │  tgflow-transport   │  <- This crate (implementations)
//! ├─────────────────────┤
//! │  Network (HTTPS)    │
//! └─────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tgflow_core::{HttpClientConfig, UpdateSource};
//! use tgflow_transport::HttpBotClient;
//!
//! let client = HttpBotClient::new(HttpClientConfig::new(token))?;
//! let me = client.probe().await?;
//! println!("running as @{}", me.username.unwrap_or_default());
//! ```

#[cfg(feature = "http-client")]
pub mod http;

#[cfg(feature = "http-client")]
pub use http::HttpBotClient;
