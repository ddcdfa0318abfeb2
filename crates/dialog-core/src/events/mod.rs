//! Dialog event callbacks

use rsems_sip_core::{SendFlags, SipReply, SipRequest};

use crate::dialog::DialogStatus;

/// Observer of a dialog's SIP traffic.
///
/// Every method has a no-op default so implementors only pick what they
/// need.
pub trait DialogEventHandler: Send + Sync {
    /// A request was accepted into the dialog
    fn on_sip_request(&self, _req: &SipRequest) {}

    /// A reply was matched to one of our requests
    fn on_sip_reply(&self, _req: &SipRequest, _reply: &SipReply, _old_status: DialogStatus) {}

    /// A request is about to be sent; may still be modified
    fn on_send_request(&self, _req: &mut SipRequest, _flags: &mut SendFlags) {}

    /// A reply is about to be sent; may still be modified
    fn on_send_reply(&self, _req: &SipRequest, _reply: &mut SipReply, _flags: &mut SendFlags) {}

    fn on_request_sent(&self, _req: &SipRequest) {}

    fn on_reply_sent(&self, _req: &SipRequest, _reply: &SipReply) {}

    /// The peer answered an in-dialog request with 408 or 481, or never answered
    fn on_remote_disappeared(&self, _reply: &SipReply) {}

    /// The dialog ended on our side
    fn on_local_terminate(&self, _status: DialogStatus) {}

    /// Sending failed
    fn on_failure(&self, _error: &crate::errors::DialogError) {}

    /// The last pending transaction finished
    fn on_trans_finished(&self) {}
}
