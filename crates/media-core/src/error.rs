//! Error types for media processing

use thiserror::Error;

/// Result type for media operations
pub type Result<T> = std::result::Result<T, Error>;

/// Media processing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid scheduler or clock configuration
    #[error("Invalid media configuration: {0}")]
    InvalidConfig(String),

    /// No media thread to place a session on
    #[error("No media processing threads configured")]
    NoThreads,

    /// A media thread could not be started
    #[error("Failed to spawn media thread: {0}")]
    ThreadSpawn(String),

    /// The scheduler has been stopped
    #[error("Media scheduler stopped")]
    Stopped,

    /// A session could not read or write its streams
    #[error("Stream error: {0}")]
    Stream(String),

    /// Mixer channel does not exist
    #[error("Unknown mixer channel {0}")]
    UnknownChannel(u32),
}

impl Error {
    pub fn stream(message: impl Into<String>) -> Self {
        Error::Stream(message.into())
    }
}
