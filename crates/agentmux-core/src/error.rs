//! Error types for `agentmux` core library.

use thiserror::Error;

/// Result type alias using the core `Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Upstream frame could not be decoded (not JSON, missing `type`, bad shape).
    #[error("Failed to decode upstream frame: {0}")]
    Decode(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable code used when the error is surfaced to subscribers.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Decode(_) | Self::Json(_) => "decode_error",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
        }
    }
}
