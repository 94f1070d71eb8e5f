//! HTTP transport.
//!
//! One client serves both the retrieval and the action capability.

mod client;

pub use client::HttpBotClient;
