//! # tgflow core
//!
//! The update acquisition and dispatch engine for bot platform clients.
//!
//! This crate holds everything that does not touch the network:
//!
//! - **Model**: typed updates with one payload variant each ([`Update`], [`UpdateKind`])
//! - **Decoder**: raw JSON to [`Update`], forward compatible ([`UpdateDecoder`])
//! - **Cursor**: monotonic offset tracking ([`OffsetCursor`])
//! - **Fan-out**: ordered, isolated delivery to subscribers ([`Dispatcher`])
//! - **Capabilities**: the retrieval ([`UpdateSource`]) and action ([`ApiCaller`])
//!   interfaces implemented by transports, plus their configuration ([`HttpClientConfig`])
//!
//! ## Data Flow
//!
//! ```text
//! ┌──────────────┐  raw   ┌─────────┐ Update ┌────────────┐     ┌────────────┐
//! │ UpdateSource │───────▶│ Decoder │───────▶│ Dispatcher │────▶│ Subscriber │
//! └──────────────┘        └─────────┘        └────────────┘────▶│ Subscriber │
//!        ▲                                         │            └────────────┘
//!        └──────────── OffsetCursor ◀──────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tgflow_core::{Dispatcher, UpdateDecoder, subscriber_fn};
//!
//! let dispatcher = Dispatcher::default();
//! dispatcher.subscribe("printer", subscriber_fn(|update| async move {
//!     println!("{} -> {}", update.update_id, update.field_name());
//!     Ok(())
//! }));
//!
//! let update = UpdateDecoder::default().decode(&raw)?;
//! dispatcher.publish(Arc::new(update)).await;
//! ```

pub mod api;
pub mod cursor;
pub mod decoder;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod report;
pub mod source;
pub mod subscriber;
pub mod transport;

pub use api::{ApiCaller, ApiResponse, BotApi, BoxedApiCaller, ResponseParameters};
pub use cursor::OffsetCursor;
pub use decoder::{Decoded, DecoderConfig, UpdateDecoder, peek_update_id};
pub use dispatch::{DeliveryMode, DeliveryOutcome, DispatchConfig, Dispatcher, PublishReport};
pub use error::{
    ApiError, ApiResult, DecodeError, DecodeResult, InvalidCursorError, PlatformError,
    SessionError, SessionResult, SubscriberError,
};
pub use model::{Update, UpdateKind, UpdateVisitor};
pub use report::ErrorReporter;
pub use source::{BoxedUpdateSource, FetchRequest, UpdateSource};
pub use subscriber::{
    BoxedSubscriber, FnSubscriber, Sequence, Subscriber, SubscriptionHandle, subscriber_fn,
};
pub use transport::{DEFAULT_SERVER, HttpClientConfig};

/// Prelude for common imports.
pub mod prelude {
    pub use super::model::*;
    pub use super::{
        ApiCaller, BotApi, Dispatcher, Sequence, Subscriber, SubscriberError, SubscriptionHandle,
        UpdateSource, subscriber_fn,
    };
}
