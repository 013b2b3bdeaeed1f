//! Envoy client error types.

use thiserror::Error;

pub type EnvoyResult<T> = Result<T, EnvoyError>;

#[derive(Debug, Error)]
pub enum EnvoyError {
    /// The request never produced a response (connect, TLS, body read).
    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("{message}")]
    Status {
        status: reqwest::StatusCode,
        message: String,
    },

    #[error("Failed to parse response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Config error: {0}")]
    Config(#[from] std::io::Error),

    #[error("A stream is already running for this conversation")]
    StreamInProgress,

    #[error("Working directory is locked while the conversation has messages")]
    WorkingDirLocked,

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
}
