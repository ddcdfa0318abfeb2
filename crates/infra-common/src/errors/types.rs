use thiserror::Error;

/// Result type for infra-common operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the shared infrastructure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The logging subscriber could not be installed
    #[error("Logging error: {0}")]
    Logging(String),

    /// No worker thread is available to take a queue
    #[error("No worker available: {0}")]
    NoWorkerAvailable(String),

    /// A worker or collector thread could not be spawned
    #[error("Thread spawn failed: {0}")]
    ThreadSpawn(String),

    /// The component was already stopped
    #[error("Component stopped: {0}")]
    Stopped(String),

    /// Internal invariant broken
    #[error("Internal error: {0}")]
    Internal(String),

    /// Free-form error with attached context
    #[error("{0}")]
    Custom(String),
}
