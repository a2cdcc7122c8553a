//! Protocol-level errors for newline-delimited JSON messages
//!
//! Each variant carries enough context to log the offending line without
//! re-parsing it.

use thiserror::Error;

/// Wire decoding and boundary-validation failures
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Line is not valid JSON or does not match any message shape
    #[error("Malformed message: {source} (line: {excerpt})")]
    Malformed {
        excerpt: String,
        #[source]
        source: serde_json::Error,
    },

    /// Message `type` tag is not recognized
    #[error("Unknown message type '{message_type}'")]
    UnknownType { message_type: String },

    /// Message parsed but a field fails boundary validation
    #[error("Invalid {message_type} message: {reason}")]
    InvalidField {
        message_type: &'static str,
        reason: String,
    },

    /// Line exceeds the configured maximum length
    #[error("Message too large: {size} bytes exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// Outbound value could not be serialized
    #[error("Encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl ProtocolError {
    pub fn invalid(message_type: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            message_type,
            reason: reason.into(),
        }
    }

    /// Errors that indicate a bad line rather than a broken stream
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ProtocolError::MessageTooLarge { .. })
    }
}

impl From<types::ValidationError> for ProtocolError {
    fn from(err: types::ValidationError) -> Self {
        ProtocolError::InvalidField {
            message_type: "message",
            reason: err.to_string(),
        }
    }
}
