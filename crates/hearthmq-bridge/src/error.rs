//! Bridge error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Core(#[from] hearthmq_core::Error),

    #[error("module has no component identifier")]
    NoComponent,

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BridgeError {
    pub fn handler(msg: impl Into<String>) -> Self {
        BridgeError::Handler(msg.into())
    }
}
