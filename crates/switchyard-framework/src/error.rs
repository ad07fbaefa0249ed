//! Error types for the Switchyard framework.
//!
//! Errors fall into two groups:
//!
//! - Registration-time errors ([`RegistrationError`]) are returned straight
//!   to the caller. Registration happens once at startup, so these are
//!   configuration mistakes and are never retried.
//! - Dispatch-time errors ([`DispatchError`]) are isolated per descriptor or
//!   handler and handed to an [`ErrorSink`]. They never stop the dispatcher.

use switchyard_core::EventKind;
use thiserror::Error;
use tracing::error;

use crate::descriptor::OrderKey;

/// Boxed error returned by handler bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by handler bodies.
pub type HandlerResult = Result<(), BoxError>;

// ============================================================================
// Registration
// ============================================================================

/// Errors raised synchronously when adding a descriptor.
#[derive(Debug, Clone, Error)]
pub enum RegistrationError {
    /// The registry was frozen and accepts no further descriptors.
    #[error("registry is frozen")]
    Frozen,

    /// The descriptor was added to a registry dedicated to another kind.
    #[error("descriptor kind mismatch: expected '{expected}', got '{got}'")]
    KindMismatch { expected: EventKind, got: EventKind },

    /// A command alias is already claimed by another handler.
    #[error("command alias '{alias}' of handler '{handler}' is already registered")]
    DuplicateAlias { alias: String, handler: String },

    /// Priority shifting did not find a free order key within the cap.
    #[error("no free order key found for {key} after {attempts} shifts")]
    PriorityShiftExhausted { key: OrderKey, attempts: usize },
}

/// Result type for registration operations.
pub type RegistrationResult<T> = Result<T, RegistrationError>;

// ============================================================================
// Filters
// ============================================================================

/// Error raised by a filter predicate.
///
/// The pipeline does not catch it. The dispatcher treats the descriptor as
/// non-matching and reports [`DispatchError::FilterEvaluation`].
#[derive(Debug, Error)]
#[error("{message}")]
pub struct FilterError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl FilterError {
    /// Creates a filter error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a filter error wrapping an underlying cause.
    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result type returned by filter predicates.
pub type FilterResult = Result<bool, FilterError>;

// ============================================================================
// Extraction
// ============================================================================

/// Errors that can occur while extracting handler parameters.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// The event is not of the expected concrete type.
    #[error("event type mismatch: expected '{expected}', got {got} update")]
    EventTypeMismatch {
        expected: &'static str,
        got: EventKind,
    },

    /// The event does not carry the requested projection.
    #[error("update carries no '{0}'")]
    MissingProjection(&'static str),

    /// The context was built without an awaiting provider.
    #[error("awaiting is not available in this context")]
    AwaitingUnavailable,

    /// Custom extraction error.
    #[error("{0}")]
    Custom(String),
}

impl ExtractError {
    /// Creates a custom extraction error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

/// Result type for extraction operations.
pub type ExtractResult<T> = Result<T, ExtractError>;

// ============================================================================
// Dispatch
// ============================================================================

/// Errors isolated to a single descriptor or handler during dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A filter predicate failed. The descriptor was treated as non-matching.
    #[error("filters of '{handler}' failed on {kind} update: {source}")]
    FilterEvaluation {
        handler: String,
        kind: EventKind,
        source: FilterError,
    },

    /// A handler body returned an error or panicked.
    #[error("handler '{handler}' faulted on {kind} update {}: {source}", update_label(.update_id))]
    HandlerFaulted {
        handler: String,
        kind: EventKind,
        update_id: Option<i64>,
        source: BoxError,
    },

    /// A keyed descriptor matched but no handler is bound to its key.
    #[error("no handler is bound to service key '{key}' of '{handler}'")]
    Unresolved { handler: String, key: String },
}

impl DispatchError {
    /// Returns the display name of the descriptor the error belongs to.
    pub fn handler(&self) -> &str {
        match self {
            DispatchError::FilterEvaluation { handler, .. }
            | DispatchError::HandlerFaulted { handler, .. }
            | DispatchError::Unresolved { handler, .. } => handler,
        }
    }
}

fn update_label(update_id: &Option<i64>) -> String {
    match update_id {
        Some(id) => format!("#{id}"),
        None => "(no id)".to_string(),
    }
}

// ============================================================================
// Await
// ============================================================================

/// Errors returned by the await primitive.
#[derive(Debug, Clone, Error)]
pub enum AwaitError {
    /// The cancellation token fired before a matching event arrived.
    #[error("await was cancelled before a matching update arrived")]
    Cancelled,

    /// The awaiting descriptor was dropped without delivering an event.
    #[error("awaiting channel closed")]
    Closed,

    /// The origin event carries no correlation key for the resolver.
    #[error("origin update has no correlation key for {resolver}")]
    NoKey { resolver: &'static str },

    /// The synthetic descriptor could not be registered.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// The delivered event lacks the requested projection.
    #[error("awaited update carries no '{0}'")]
    MissingProjection(&'static str),
}

/// Result type for await operations.
pub type AwaitResult<T> = Result<T, AwaitError>;

// ============================================================================
// Error Sink
// ============================================================================

/// Side channel receiving dispatch-time faults.
pub trait ErrorSink: Send + Sync + 'static {
    fn report(&self, error: DispatchError);
}

/// Default sink: logs every fault at `error` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, err: DispatchError) {
        error!(handler = %err.handler(), "{err}");
    }
}

impl<F> ErrorSink for F
where
    F: Fn(DispatchError) + Send + Sync + 'static,
{
    fn report(&self, error: DispatchError) {
        self(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faulted_display_includes_handler_and_update() {
        let err = DispatchError::HandlerFaulted {
            handler: "EchoHandler".into(),
            kind: EventKind::Message,
            update_id: Some(17),
            source: "boom".into(),
        };
        assert_eq!(err.handler(), "EchoHandler");
        assert_eq!(
            err.to_string(),
            "handler 'EchoHandler' faulted on message update #17: boom"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_filter_error_source_is_optional() {
        let plain = FilterError::new("no text");
        assert!(std::error::Error::source(&plain).is_none());
        let wrapped = FilterError::with_source("bad regex", "unclosed group");
        assert_eq!(wrapped.message(), "bad regex");
        assert!(std::error::Error::source(&wrapped).is_some());
    }
}
