//! The `error` module defines the error type shared across `pollcast`.
//!
//! Only genuine failures live here. A publish that reached nobody, a long-poll
//! that timed out and a waiter that was cancelled are ordinary outcomes and
//! are modelled by the outcome enums in `broker` and `session` instead.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("topic name is missing")]
    MissingTopic,

    #[error("session identifier is missing")]
    MissingSession,

    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("another broker is already listening on {addr}")]
    AlreadyRunning { addr: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Input rejections the caller can fix by sending a different request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::MissingTopic
                | Error::MissingSession
                | Error::PayloadTooLarge { .. }
                | Error::InvalidJson(_)
                | Error::MalformedRequest(_)
        )
    }
}
