//! Error types for the SIP message model

use thiserror::Error;

/// Result type for sip-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building or inspecting SIP messages
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// A method token could not be interpreted
    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    /// A status code was outside 100..=699
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// A mandatory field was empty
    #[error("Missing mandatory field: {0}")]
    MissingField(&'static str),

    /// Malformed header value
    #[error("Invalid header {name}: {value}")]
    InvalidHeader {
        /// Header name
        name: String,
        /// Offending value
        value: String,
    },
}
