//! Error types for the tgflow engine.
//!
//! Each stage of the update pipeline owns one error type. [`SessionError`]
//! wraps all of them so a session can keep its last error and broadcast it to
//! interested observers.

use std::time::Duration;

use thiserror::Error;

// =============================================================================
// Decode Errors
// =============================================================================

/// Errors raised while turning a raw payload into an [`Update`](crate::Update).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The payload is not a JSON object.
    #[error("update payload is not an object")]
    NotAnObject,

    /// A required field is absent.
    #[error("missing required field '{field}'")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },

    /// An identifier is not an exact 64-bit integer.
    #[error("field '{field}' is not an exact 64-bit integer: {value}")]
    InvalidIdentifier {
        /// Name of the offending field.
        field: &'static str,
        /// The value as received.
        value: String,
    },

    /// The update has an identifier but no payload field.
    #[error("update {update_id} carries no payload")]
    EmptyUpdate {
        /// Identifier of the empty update.
        update_id: i64,
    },

    /// A known payload does not match its expected shape.
    #[error("invalid '{field}' payload in update {update_id}: {reason}")]
    InvalidPayload {
        /// Identifier of the update.
        update_id: i64,
        /// Payload field name.
        field: String,
        /// Underlying deserialization failure.
        reason: String,
    },
}

impl DecodeError {
    /// Returns the update identifier when the failure happened after it was read.
    pub fn update_id(&self) -> Option<i64> {
        match self {
            Self::EmptyUpdate { update_id } | Self::InvalidPayload { update_id, .. } => {
                Some(*update_id)
            }
            _ => None,
        }
    }
}

// =============================================================================
// Platform & API Errors
// =============================================================================

/// Application-level rejections reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// The bot credential was rejected. Never retried.
    #[error("credential rejected ({code}): {description}")]
    Unauthorized { code: i64, description: String },

    /// Too many requests; the platform asks to wait before retrying.
    #[error("rate limited for {retry_after:?}: {description}")]
    RateLimited {
        retry_after: Duration,
        description: String,
    },

    /// Another consumer (webhook or a second poller) holds the update stream.
    #[error("conflict: {description}")]
    Conflict { description: String },

    /// Any other rejection.
    #[error("request rejected ({}): {description}", display_code(.code))]
    Rejected {
        code: Option<i64>,
        description: String,
    },
}

fn display_code(code: &Option<i64>) -> String {
    code.map_or_else(|| "no code".to_string(), |c| c.to_string())
}

impl PlatformError {
    /// Classifies an unsuccessful API envelope.
    pub fn from_response(
        error_code: Option<i64>,
        description: Option<String>,
        retry_after: Option<u64>,
    ) -> Self {
        let description = description.unwrap_or_else(|| "no description".to_string());
        match (error_code, retry_after) {
            (Some(code @ (401 | 404)), _) => Self::Unauthorized { code, description },
            (Some(429), secs) | (_, secs @ Some(_)) => Self::RateLimited {
                retry_after: Duration::from_secs(secs.unwrap_or(1)),
                description,
            },
            (Some(409), None) => Self::Conflict { description },
            (code, None) => Self::Rejected { code, description },
        }
    }

    /// Returns true if retrying cannot succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Returns the platform-mandated wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Errors produced by the retrieval and action capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Transient transport failure.
    #[error("network error: {0}")]
    Network(String),

    /// The request outlived its deadline.
    #[error("request timed out")]
    Timeout,

    /// The platform rejected the request.
    #[error(transparent)]
    Platform(#[from] PlatformError),

    /// The response could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Creates an invalid response error.
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Returns true if the session must stop retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Platform(p) if p.is_fatal())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

// =============================================================================
// Cursor & Subscriber Errors
// =============================================================================

/// The cursor was asked to move backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cursor cannot move backwards from {current} to {requested}")]
pub struct InvalidCursorError {
    /// Value held by the cursor.
    pub current: i64,
    /// Rejected value.
    pub requested: i64,
}

/// Failure signalled by subscriber logic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriberError {
    /// The subscriber returned an error.
    #[error("{0}")]
    Failed(String),

    /// The subscriber panicked while handling the update.
    #[error("subscriber panicked: {0}")]
    Panicked(String),
}

impl SubscriberError {
    /// Creates a failure from any displayable message.
    pub fn msg(msg: impl std::fmt::Display) -> Self {
        Self::Failed(msg.to_string())
    }
}

impl From<ApiError> for SubscriberError {
    fn from(err: ApiError) -> Self {
        Self::Failed(err.to_string())
    }
}

// =============================================================================
// Session Errors
// =============================================================================

/// Everything a session can report through its status or error channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// One payload could not be decoded and was skipped.
    #[error("failed to decode update: {0}")]
    Decode(#[from] DecodeError),

    /// The retrieval or probe call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The cursor ordering invariant was violated.
    #[error(transparent)]
    InvalidCursor(#[from] InvalidCursorError),

    /// A subscriber failed on one update.
    #[error("subscriber '{subscriber}' failed on update {update_id}: {source}")]
    Subscriber {
        /// Registration name of the subscriber.
        subscriber: String,
        /// Update being handled.
        update_id: i64,
        /// The failure.
        #[source]
        source: SubscriberError,
    },

    /// An operation required a running session.
    #[error("session is not running")]
    NotRunning,

    /// Queued deliveries were still pending when the stop drain limit ran out.
    #[error("subscribers did not drain within {0:?}")]
    DrainTimeout(Duration),
}

impl SessionError {
    /// Returns true if the error moves the session to `Failed`.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Api(err) => err.is_fatal(),
            Self::InvalidCursor(_) => true,
            _ => false,
        }
    }
}

impl From<PlatformError> for SessionError {
    fn from(err: PlatformError) -> Self {
        Self::Api(ApiError::Platform(err))
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for decoding.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Result type for capability calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
