//! Error types for student-stream

use thiserror::Error;

/// Errors that can occur while provisioning, publishing, or consuming
#[derive(Debug, Error)]
pub enum EventError {
    /// Broker connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Stream could not be created
    #[error("Failed to provision stream '{stream}': {reason}")]
    Provisioning {
        stream: String,
        reason: String,
    },

    /// Stream lookup or management error
    #[error("Stream error: {0}")]
    Stream(String),

    /// Publish failure
    #[error("Failed to publish event to subject '{subject}': {reason}")]
    Publish {
        subject: String,
        reason: String,
    },

    /// Subscribe failure
    #[error("Failed to subscribe to subject '{subject}': {reason}")]
    Subscribe {
        subject: String,
        reason: String,
    },

    /// Consumer creation or state error
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Record could not be serialized
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// Payload is malformed or does not match the record schema
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),

    /// Acknowledgement failure
    #[error("Failed to acknowledge message: {0}")]
    Ack(String),

    /// Message handler reported a processing failure
    #[error("Handler failed: {0}")]
    Handler(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Termination signal handler could not be installed
    #[error("Signal handling error: {0}")]
    Signal(String),

    /// Broker connection has been drained
    #[error("Broker connection closed")]
    Closed,
}

impl EventError {
    /// Build a handler error from any displayable reason
    pub fn handler(reason: impl std::fmt::Display) -> Self {
        Self::Handler(reason.to_string())
    }
}

/// Result type alias for delivery operations
pub type Result<T> = std::result::Result<T, EventError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_error_display() {
        let err = EventError::Publish {
            subject: "student.Created".to_string(),
            reason: "no responders".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to publish event to subject 'student.Created': no responders"
        );
    }

    #[test]
    fn test_decode_error_keeps_source() {
        let source = serde_json::from_str::<u32>("nope").unwrap_err();
        let err = EventError::Decode(source);
        assert!(err.to_string().starts_with("Decoding error:"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
