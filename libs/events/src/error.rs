//! Error types for event handling.

use thiserror::Error;

/// Errors that can occur when building or decoding events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The event version is not supported.
    #[error("unsupported event version: {event_type} v{version}")]
    UnsupportedVersion { event_type: String, version: i32 },

    /// The event payload does not match its event type.
    #[error("invalid event payload for {event_type}: {message}")]
    InvalidPayload { event_type: String, message: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A required envelope field was not set on the builder.
    #[error("missing envelope field: {0}")]
    MissingField(&'static str),

    /// An aggregate type string is not known.
    #[error("unknown aggregate type: {0}")]
    UnknownAggregateType(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Serialization(err.to_string())
    }
}
