//! SIP dialog state machine
//!
//! A [`Dialog`] tracks one call leg: identifiers, CSeq counters, status and
//! the transactions it has pending on either side. It is driven from the
//! owning session's event queue, so it never sees concurrent calls.

pub mod dialog_id;
pub mod dialog_impl;
pub mod dialog_state;
pub mod policy;

pub use dialog_id::DialogId;
pub use dialog_impl::{Dialog, MessageOptions, RxReply, RxRequest};
pub use dialog_state::DialogStatus;
pub use policy::{AppendHeaders, DialogPolicy, SanityVerdict};
