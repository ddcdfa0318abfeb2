//! Call legs
//!
//! A call leg is an actor: an [`EventQueue`] whose handler owns one
//! [`Dialog`] and the application [`CallLogic`] driving it. Everything that
//! happens to the leg arrives as a [`SessionEvent`] and is handled on
//! whichever worker currently drains the queue, one event at a time.

use std::sync::{Arc, Weak};

use rsems_dialog_core::{
    Dialog, DialogKey, DialogResult, DialogStatus, ExpiredTransaction, RxReply, RxRequest,
};
use rsems_infra_common::{CallStatus, CallWatcher, EventHandler, EventQueue};
use rsems_sip_core::{SipReply, SipRequest};
use tracing::{debug, warn};

use super::container::SessionContainer;

/// Event delivered to a call leg
#[derive(Debug)]
pub enum SessionEvent {
    SipRequest(SipRequest),
    SipReply(SipReply),
    TransactionTimeout(ExpiredTransaction),
    Dtmf { event: u8, duration_ms: u32 },
    MediaTerminated,
    /// Locally created leg: let the logic send its first request
    Start,
    /// Tear the leg down
    Terminate,
}

/// Application behaviour of a call leg
///
/// Requests and replies reach the logic only after the dialog accepted
/// them; retransmissions and sanity failures are handled below it.
pub trait CallLogic: Send + 'static {
    fn on_start(&mut self, _dialog: &mut Dialog) -> DialogResult<()> {
        Ok(())
    }

    fn on_request(&mut self, dialog: &mut Dialog, req: &SipRequest) -> DialogResult<()>;

    fn on_reply(&mut self, _dialog: &mut Dialog, _reply: &SipReply, _old_status: DialogStatus) -> DialogResult<()> {
        Ok(())
    }

    fn on_dtmf(&mut self, _dialog: &mut Dialog, _event: u8, _duration_ms: u32) {}

    fn on_media_terminated(&mut self, _dialog: &mut Dialog) {}

    /// Last call before the leg is released
    fn on_terminated(&mut self, _dialog: &mut Dialog) {}
}

/// Status record the call watcher keeps per leg
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegStatus {
    pub status: DialogStatus,
    pub local_tag: String,
    pub remote_tag: String,
}

impl CallStatus for LegStatus {
    type Update = DialogStatus;

    fn update(&mut self, update: &DialogStatus) {
        self.status = *update;
    }
}

/// Queue handler of a call leg
pub struct CallLegHandler {
    key: DialogKey,
    remote_key: Option<(String, String)>,
    dialog: Dialog,
    logic: Box<dyn CallLogic>,
    container: Weak<SessionContainer>,
    watcher: Option<Arc<CallWatcher<LegStatus>>>,
    active: bool,
}

/// A call leg's mailbox
pub type CallLeg = EventQueue<CallLegHandler>;

impl CallLegHandler {
    pub(crate) fn new(
        dialog: Dialog,
        logic: Box<dyn CallLogic>,
        remote_key: Option<(String, String)>,
        container: Weak<SessionContainer>,
        watcher: Option<Arc<CallWatcher<LegStatus>>>,
    ) -> Self {
        let key = dialog.key();
        if let Some(w) = &watcher {
            w.initialize(
                key.call_id.clone(),
                LegStatus {
                    status: dialog.status(),
                    local_tag: dialog.local_tag().to_string(),
                    remote_tag: dialog.remote_tag().to_string(),
                },
            );
        }
        CallLegHandler {
            key,
            remote_key,
            dialog,
            logic,
            container,
            watcher,
            active: true,
        }
    }

    pub fn key(&self) -> &DialogKey {
        &self.key
    }

    pub fn dialog(&self) -> &Dialog {
        &self.dialog
    }

    fn handle(&mut self, event: SessionEvent) -> DialogResult<()> {
        match event {
            SessionEvent::SipRequest(req) => {
                if self.dialog.on_rx_request(&req)? == RxRequest::Accepted {
                    self.logic.on_request(&mut self.dialog, &req)?;
                }
            }
            SessionEvent::SipReply(reply) => {
                if let RxReply::Accepted { old_status } = self.dialog.on_rx_reply(&reply)? {
                    self.logic.on_reply(&mut self.dialog, &reply, old_status)?;
                }
            }
            SessionEvent::TransactionTimeout(expired) => self.dialog.on_trans_timeout(&expired)?,
            SessionEvent::Dtmf { event, duration_ms } => self.logic.on_dtmf(&mut self.dialog, event, duration_ms),
            SessionEvent::MediaTerminated => self.logic.on_media_terminated(&mut self.dialog),
            SessionEvent::Start => self.logic.on_start(&mut self.dialog)?,
            SessionEvent::Terminate => {
                debug!(call_id = %self.key.call_id, "terminating call leg");
                self.dialog.finalize();
                self.active = false;
            }
        }
        Ok(())
    }
}

impl EventHandler for CallLegHandler {
    type Event = SessionEvent;

    fn process(&mut self, event: SessionEvent) {
        let before = self.dialog.status();

        if let Err(e) = self.handle(event) {
            warn!(call_id = %self.key.call_id, local_tag = %self.key.local_tag, "call leg event failed: {}", e);
        }

        let after = self.dialog.status();
        if before != after {
            if let Some(w) = &self.watcher {
                w.update(self.key.call_id.clone(), after);
            }
        }
        if self.dialog.is_disposable() {
            self.active = false;
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn on_finalize(&mut self) {
        self.logic.on_terminated(&mut self.dialog);
        self.dialog.drop_transactions();
        if let Some(w) = &self.watcher {
            w.obsolete(self.key.call_id.clone());
        }
        if let Some(container) = self.container.upgrade() {
            container.remove_leg(&self.key, self.remote_key.as_ref());
        }
        debug!(call_id = %self.key.call_id, local_tag = %self.key.local_tag, "call leg released");
    }
}
