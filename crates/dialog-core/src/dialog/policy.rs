//! Dialog policies
//!
//! Strategy objects consulted by the [`Dialog`](super::Dialog) at fixed
//! points of message processing. Policies run in the order they were added;
//! the first one that rejects or vetoes wins.

use rsems_sip_core::{Headers, SendFlags, SipReply, SipRequest};

use super::DialogStatus;
use crate::errors::DialogResult;

/// Outcome of a request sanity check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanityVerdict {
    Accept,
    /// Answer statelessly with this error and drop the request
    Reject { code: u16, reason: String, hdrs: Headers },
}

impl SanityVerdict {
    pub fn reject(code: u16, reason: impl Into<String>) -> Self {
        SanityVerdict::Reject { code, reason: reason.into(), hdrs: Headers::new() }
    }
}

/// Extension points of the dialog state machine
pub trait DialogPolicy: Send {
    /// Check a received request before any transaction is created
    fn on_rx_req_sanity(&mut self, _req: &SipRequest, _status: DialogStatus) -> SanityVerdict {
        SanityVerdict::Accept
    }

    /// Veto further processing of an accepted request by returning `false`
    fn on_rx_req_status(&mut self, _req: &SipRequest, _status: DialogStatus) -> bool {
        true
    }

    /// Drop a received reply by returning `false`
    fn on_rx_reply_sanity(&mut self, _reply: &SipReply, _status: DialogStatus) -> bool {
        true
    }

    /// Stop a reply from reaching the event handler by returning `false`.
    /// Dialog bookkeeping has already been applied at this point.
    fn on_rx_reply_status(&mut self, _reply: &SipReply, _status: DialogStatus) -> bool {
        true
    }

    /// Rewrite an outgoing request. An error aborts the send.
    fn on_tx_request(&mut self, _req: &mut SipRequest, _flags: &mut SendFlags) -> DialogResult<()> {
        Ok(())
    }

    /// Rewrite an outgoing reply. An error aborts the send.
    fn on_tx_reply(&mut self, _req: &SipRequest, _reply: &mut SipReply, _flags: &mut SendFlags) -> DialogResult<()> {
        Ok(())
    }
}

/// Adds fixed headers to every outgoing request and reply
#[derive(Debug, Clone, Default)]
pub struct AppendHeaders {
    hdrs: Headers,
}

impl AppendHeaders {
    pub fn new(hdrs: Headers) -> Self {
        Self { hdrs }
    }
}

impl DialogPolicy for AppendHeaders {
    fn on_tx_request(&mut self, req: &mut SipRequest, flags: &mut SendFlags) -> DialogResult<()> {
        if !flags.verbatim {
            for h in self.hdrs.iter() {
                req.hdrs.add(h.name.clone(), h.value.clone());
            }
        }
        Ok(())
    }

    fn on_tx_reply(&mut self, _req: &SipRequest, reply: &mut SipReply, flags: &mut SendFlags) -> DialogResult<()> {
        if !flags.verbatim {
            for h in self.hdrs.iter() {
                reply.hdrs.add(h.name.clone(), h.value.clone());
            }
        }
        Ok(())
    }
}
