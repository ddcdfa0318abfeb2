//! Error types for dialog-core
//!
//! Lookups that find nothing are not errors: the table returns `None` and
//! the dialog answers or drops the message. [`DialogError`] covers what a
//! caller of the dialog API can actually get wrong, plus transport failures.

use thiserror::Error;

use crate::dialog::DialogStatus;

/// Result type for dialog operations
pub type DialogResult<T> = Result<T, DialogError>;

#[derive(Debug, Error)]
pub enum DialogError {
    /// Invalid configuration value
    #[error("Dialog configuration error: {message}")]
    Configuration { message: String },

    /// No pending transaction for the given CSeq
    #[error("No pending {method} transaction with CSeq {cseq}")]
    TransactionNotFound { method: String, cseq: u32 },

    /// Operation not allowed in the current dialog status
    #[error("Cannot {operation} in dialog status {status}")]
    InvalidState { operation: &'static str, status: DialogStatus },

    /// The local CSeq space is used up
    #[error("Local CSeq exhausted")]
    CSeqExhausted,

    /// CANCEL requested without a pending INVITE
    #[error("No pending INVITE to cancel")]
    NoPendingInvite,

    /// A policy refused to send the message
    #[error("Policy rejected message: {reason}")]
    PolicyRejected { reason: String },

    /// The transport could not send the message
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Message failed validation
    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] rsems_sip_core::Error),
}

impl DialogError {
    pub fn transport(message: impl Into<String>) -> Self {
        DialogError::Transport { message: message.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        DialogError::Configuration { message: message.into() }
    }
}
