//! Transaction records stored in the [`TransactionTable`](super::TransactionTable)

use std::fmt;
use std::time::Instant;

use rsems_sip_core::{Method, SipReply, SipRequest};
use serde::Serialize;

/// Role of the local side in a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransactionType {
    /// We sent the request
    Uac,
    /// We received the request
    Uas,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Uac => write!(f, "UAC"),
            TransactionType::Uas => write!(f, "UAS"),
        }
    }
}

/// Progress of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransactionState {
    /// No reply yet
    Trying,
    /// A provisional reply was sent or received
    Proceeding,
    /// A final reply was sent or received; kept for retransmissions
    Completed,
}

impl TransactionState {
    /// Still waiting for a final reply
    pub fn is_pending(&self) -> bool {
        !matches!(self, TransactionState::Completed)
    }
}

/// Handle to a transaction: the owning bucket and a key unique in the table.
///
/// Holding an id never keeps a transaction alive; every access goes through
/// the table and fails once the entry is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TransactionId {
    pub(crate) bucket: usize,
    pub(crate) key: u64,
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.bucket, self.key)
    }
}

/// Identifies the dialog owning a transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DialogKey {
    pub call_id: String,
    pub local_tag: String,
}

impl DialogKey {
    pub fn new(call_id: impl Into<String>, local_tag: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), local_tag: local_tag.into() }
    }
}

impl fmt::Display for DialogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.call_id, self.local_tag)
    }
}

/// A transaction as stored in its bucket
#[derive(Debug, Clone)]
pub struct Transaction {
    pub(crate) key: u64,
    pub trans_type: TransactionType,
    pub state: TransactionState,
    /// The request that opened the transaction
    pub request: SipRequest,
    /// Owning dialog
    pub dialog: DialogKey,
    /// To-tag of the final or latest provisional reply
    pub to_tag: String,
    /// Status code of the latest reply, 0 before any reply
    pub reply_code: u16,
    /// RSeq of the latest reliable provisional reply (UAS)
    pub rseq: u32,
    /// Last reply sent, re-sent on request retransmissions (UAS)
    pub last_reply: Option<SipReply>,
    /// When the transaction times out (pending) or is purged (completed)
    pub deadline: Instant,
}

impl Transaction {
    pub fn method(&self) -> &Method {
        &self.request.method
    }

    pub fn cseq(&self) -> u32 {
        self.request.cseq
    }

    pub fn call_id(&self) -> &str {
        &self.request.call_id
    }

    pub fn branch(&self) -> &str {
        &self.request.via_branch
    }

    pub fn is_invite(&self) -> bool {
        self.request.method == Method::Invite
    }
}

/// A transaction removed by the timer sweep while still waiting for its
/// final reply
#[derive(Debug, Clone)]
pub struct ExpiredTransaction {
    pub trans_type: TransactionType,
    pub dialog: DialogKey,
    pub method: Method,
    pub cseq: u32,
    pub request: SipRequest,
}

/// Serializable snapshot of one transaction, for status dumps
#[derive(Debug, Clone, Serialize)]
pub struct TransactionSummary {
    pub id: TransactionId,
    pub trans_type: TransactionType,
    pub state: TransactionState,
    pub method: String,
    pub call_id: String,
    pub cseq: u32,
    pub reply_code: u16,
}
