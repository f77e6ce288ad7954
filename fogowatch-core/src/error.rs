//! Error types for fogowatch-core

use thiserror::Error;

/// Main error type for the fogowatch-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Incident feed could not be fetched or decoded
    #[error("feed error: {0}")]
    Feed(String),

    /// Notification transport error
    #[error("notify error: {0}")]
    Notify(String),

    /// State file error
    #[error("state error: {0}")]
    State(String),
}

/// Result type alias for fogowatch-core
pub type Result<T> = std::result::Result<T, Error>;
