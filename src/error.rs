//! Error types for the avatar voice pipeline

use thiserror::Error;

use crate::assistant::Status;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a turn
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone unavailable or access denied
    #[error("microphone error: {0}")]
    Permission(String),

    /// Audio device or encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text failed or produced no text
    #[error("transcription error: {0}")]
    Transcription(String),

    /// Reply stream could not be opened or broke mid-stream
    #[error("generation error: {0}")]
    Generation(String),

    /// Text-to-speech failed for a single unit
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Playback of a single unit failed
    #[error("playback error: {0}")]
    Playback(String),

    /// A turn is already in flight
    #[error("turn already in progress (status: {0})")]
    Busy(Status),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Session status a turn ends in when it fails with this error
    #[must_use]
    pub const fn terminal_status(&self) -> Status {
        match self {
            Self::Permission(_) => Status::MicError,
            _ => Status::Error,
        }
    }
}
