//! Runtime error types.

use thiserror::Error;
use tgflow_core::{ApiError, SessionError};

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Session not found.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Session already registered.
    #[error("Session already exists: {0}")]
    SessionExists(String),

    /// A session operation failed.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A transport could not be created.
    #[error("Transport error: {0}")]
    Api(#[from] ApiError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
