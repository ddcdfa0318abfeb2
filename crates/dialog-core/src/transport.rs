//! Boundary to the transport layer

use rsems_sip_core::{SendFlags, SipReply, SipRequest};

use crate::errors::DialogResult;

/// Sends serialized messages; the only outbound side effect of a dialog
pub trait MessageSender: Send + Sync {
    fn send_request(&self, req: &SipRequest, flags: SendFlags) -> DialogResult<()>;

    fn send_reply(&self, reply: &SipReply, flags: SendFlags) -> DialogResult<()>;
}
