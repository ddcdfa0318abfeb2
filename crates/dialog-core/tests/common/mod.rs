#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use rsems_dialog_core::{
    Dialog, DialogConfig, DialogError, DialogResult, MessageSender, TransactionConfig, TransactionTable,
};
use rsems_sip_core::{Method, SendFlags, SipReply, SipRequest};

/// Records everything a dialog sends
#[derive(Default)]
pub struct RecordingSender {
    pub requests: Mutex<Vec<SipRequest>>,
    pub replies: Mutex<Vec<SipReply>>,
    pub fail: Mutex<bool>,
}

impl RecordingSender {
    pub fn last_request(&self) -> Option<SipRequest> {
        self.requests.lock().last().cloned()
    }

    pub fn last_reply(&self) -> Option<SipReply> {
        self.replies.lock().last().cloned()
    }

    pub fn sent_methods(&self) -> Vec<Method> {
        self.requests.lock().iter().map(|r| r.method.clone()).collect()
    }

    pub fn reply_codes(&self) -> Vec<u16> {
        self.replies.lock().iter().map(|r| r.code).collect()
    }
}

impl MessageSender for RecordingSender {
    fn send_request(&self, req: &SipRequest, _flags: SendFlags) -> DialogResult<()> {
        if *self.fail.lock() {
            return Err(DialogError::transport("link down"));
        }
        self.requests.lock().push(req.clone());
        Ok(())
    }

    fn send_reply(&self, reply: &SipReply, _flags: SendFlags) -> DialogResult<()> {
        if *self.fail.lock() {
            return Err(DialogError::transport("link down"));
        }
        self.replies.lock().push(reply.clone());
        Ok(())
    }
}

pub struct Fixture {
    pub table: Arc<TransactionTable>,
    pub sender: Arc<RecordingSender>,
    pub config: Arc<DialogConfig>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(DialogConfig::default())
    }

    pub fn with_config(config: DialogConfig) -> Self {
        let table = TransactionTable::new(&TransactionConfig { bucket_count: 64, t1_ms: 500 })
            .expect("valid table config");
        Fixture {
            table: Arc::new(table),
            sender: Arc::new(RecordingSender::default()),
            config: Arc::new(config),
        }
    }

    pub fn dialog(&self) -> Dialog {
        Dialog::new(self.table.clone(), self.sender.clone(), self.config.clone())
    }

    /// A dialog set up to call bob
    pub fn uac_dialog(&self) -> Dialog {
        let mut dialog = self.dialog();
        dialog.set_call_id("uac-call@alice");
        dialog.set_local_tag("alice-tag");
        dialog.set_local_party("<sip:alice@example.com>");
        dialog.set_remote_party("<sip:bob@example.com>");
        dialog.set_remote_uri("sip:bob@example.com");
        dialog.set_local_uri("<sip:alice@10.0.0.1>");
        dialog
    }
}

pub fn incoming_invite(cseq: u32, branch: &str) -> SipRequest {
    SipRequest::new(Method::Invite, "sip:service@rsems", "uas-call@bob", cseq)
        .with_from("<sip:bob@example.com>", "bob-tag")
        .with_to("<sip:service@rsems>", "")
        .with_branch(branch)
}

pub fn in_dialog_request(method: Method, cseq: u32, branch: &str, to_tag: &str) -> SipRequest {
    SipRequest::new(method, "sip:service@rsems", "uas-call@bob", cseq)
        .with_from("<sip:bob@example.com>", "bob-tag")
        .with_to("<sip:service@rsems>", to_tag)
        .with_branch(branch)
}

pub fn reply_to(req: &SipRequest, code: u16, to_tag: &str) -> SipReply {
    SipReply::from_request(req, code, "").with_to_tag(to_tag)
}
