//! Application error types for robust error handling.

use thiserror::Error;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("Directory error: {0}")]
    Directory(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Identity error: {0}")]
    Identity(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type ChatResult<T> = Result<T, ChatError>;
