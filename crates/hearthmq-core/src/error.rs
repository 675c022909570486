//! Error types for hearthmq core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    /// Payload is not UTF-8 JSON
    #[error("malformed payload on {topic}: {reason}")]
    MalformedPayload { topic: String, reason: String },

    /// Topic or topic filter violates MQTT rules
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// Node id cannot be used as a topic level
    #[error("invalid node id: {0:?}")]
    InvalidNodeId(String),
}
