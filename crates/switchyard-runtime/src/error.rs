//! Runtime error types.

use switchyard_framework::RegistrationError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A handler could not be registered.
    #[error("Handler registration failed: {0}")]
    Registration(#[from] RegistrationError),

    /// An update payload could not be decoded.
    #[error("Failed to decode update: {0}")]
    Decode(#[from] serde_json::Error),

    /// The source the update was sent to is no longer running.
    #[error("Update source is closed")]
    SourceClosed,

    /// The source buffer is full.
    #[error("Update source buffer is full")]
    SourceFull,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
