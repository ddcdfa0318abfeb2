//! Session container: routes parsed SIP messages to call legs

use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rsems_dialog_core::{Dialog, DialogConfig, DialogKey, ExpiredTransaction, MessageSender, TransactionTable};
use rsems_infra_common::{CallWatcher, Error, EventQueueProcessor, ProcessableQueue, Result};
use rsems_media_core::MediaScheduler;
use rsems_sip_core::{status, Headers, Method, SipReply, SipRequest};
use tracing::{debug, error, info, warn};

use super::leg::{CallLeg, CallLegHandler, CallLogic, LegStatus, SessionEvent};
use crate::call_control::ParallelCallLimiter;

/// Why a factory declined a new request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refusal {
    pub code: u16,
    pub reason: String,
}

impl Refusal {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self { code, reason: reason.into() }
    }
}

/// Shared services a factory may hand to the logic it creates
#[derive(Clone)]
pub struct SessionServices {
    pub media: Arc<MediaScheduler>,
    pub limiter: Arc<ParallelCallLimiter>,
}

/// Creates the logic for requests that start a new leg.
///
/// Runs on the dispatching thread; it must not call back into the
/// container.
pub trait SessionFactory: Send + Sync {
    fn create(&self, req: &SipRequest, services: &SessionServices) -> std::result::Result<Box<dyn CallLogic>, Refusal>;
}

/// What [`SessionContainer::dispatch_request`] did with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Posted to an existing leg
    Routed,
    /// A new leg was created for it
    Created,
    /// Answered statelessly
    Rejected { code: u16 },
    /// Ignored
    Dropped,
}

/// Remote dialog identity of a UAS leg: (Call-ID, remote tag)
type RemoteKey = (String, String);

/// All live call legs, keyed by (Call-ID, local tag)
pub struct SessionContainer {
    legs: DashMap<DialogKey, Arc<CallLeg>>,
    by_remote: DashMap<RemoteKey, DialogKey>,
    table: Arc<TransactionTable>,
    sender: Arc<dyn MessageSender>,
    dialog_config: Arc<DialogConfig>,
    processor: Arc<EventQueueProcessor>,
    factory: Arc<dyn SessionFactory>,
    services: SessionServices,
    watcher: Option<Arc<CallWatcher<LegStatus>>>,
    self_ref: Weak<SessionContainer>,
}

impl SessionContainer {
    pub fn new(
        table: Arc<TransactionTable>,
        sender: Arc<dyn MessageSender>,
        dialog_config: Arc<DialogConfig>,
        processor: Arc<EventQueueProcessor>,
        factory: Arc<dyn SessionFactory>,
        services: SessionServices,
        watcher: Option<Arc<CallWatcher<LegStatus>>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| SessionContainer {
            legs: DashMap::new(),
            by_remote: DashMap::new(),
            table,
            sender,
            dialog_config,
            processor,
            factory,
            services,
            watcher,
            self_ref: self_ref.clone(),
        })
    }

    /// A fresh dialog bound to this container's table and transport
    pub fn new_dialog(&self) -> Dialog {
        Dialog::new(self.table.clone(), self.sender.clone(), self.dialog_config.clone())
    }

    /// Route a received request
    pub fn dispatch_request(&self, req: SipRequest) -> Dispatch {
        if !req.to_tag.is_empty() {
            let key = DialogKey::new(req.call_id.clone(), req.to_tag.clone());
            if let Some(leg) = self.leg(&key) {
                leg.post_event(SessionEvent::SipRequest(req));
                return Dispatch::Routed;
            }
            if req.method == Method::Ack {
                debug!(call_id = %req.call_id, "ACK for unknown dialog dropped");
                return Dispatch::Dropped;
            }
            info!(call_id = %req.call_id, method = %req.method, "in-dialog request for unknown dialog");
            return self.reject(&req, status::CALL_DOES_NOT_EXIST, "");
        }

        let remote_key = (req.call_id.clone(), req.from_tag.clone());
        let known = self.by_remote.get(&remote_key).map(|k| k.value().clone());
        if let Some(leg) = known.and_then(|key| self.leg(&key)) {
            leg.post_event(SessionEvent::SipRequest(req));
            return Dispatch::Routed;
        }

        match req.method {
            Method::Ack => {
                debug!(call_id = %req.call_id, "stray ACK dropped");
                Dispatch::Dropped
            }
            Method::Cancel => self.reject(&req, status::CALL_DOES_NOT_EXIST, ""),
            _ => self.create_uas_leg(req, remote_key),
        }
    }

    fn create_uas_leg(&self, req: SipRequest, remote_key: RemoteKey) -> Dispatch {
        // holding the entry serializes concurrent retransmissions of the
        // same initial request
        let entry = match self.by_remote.entry(remote_key.clone()) {
            Entry::Occupied(entry) => {
                let key = entry.get().clone();
                drop(entry);
                return match self.leg(&key) {
                    Some(leg) => {
                        leg.post_event(SessionEvent::SipRequest(req));
                        Dispatch::Routed
                    }
                    None => Dispatch::Dropped,
                };
            }
            Entry::Vacant(entry) => entry,
        };

        let logic = match self.factory.create(&req, &self.services) {
            Ok(logic) => logic,
            Err(refusal) => {
                drop(entry);
                debug!(call_id = %req.call_id, code = refusal.code, "factory refused request");
                return self.reject(&req, refusal.code, &refusal.reason);
            }
        };

        let mut dialog = self.new_dialog();
        dialog.set_call_id(req.call_id.clone());
        dialog.set_local_uri(req.r_uri.clone());
        let key = dialog.key();

        let handler = CallLegHandler::new(
            dialog,
            logic,
            Some(remote_key),
            self.self_ref.clone(),
            self.watcher.clone(),
        );
        let leg = CallLeg::new(format!("leg-{}", key), handler);

        self.legs.insert(key.clone(), leg.clone());
        entry.insert(key.clone());

        leg.post_event(SessionEvent::SipRequest(req));
        if let Err(e) = self.processor.start_event_queue(leg.clone() as Arc<dyn ProcessableQueue>) {
            error!(leg = %key, "no worker for new call leg: {}", e);
            leg.finalize();
            return Dispatch::Rejected { code: status::SERVER_INTERNAL_ERROR };
        }
        info!(leg = %key, "call leg created");
        Dispatch::Created
    }

    /// Register a locally created leg and run its logic's `on_start`
    pub fn add_leg(&self, dialog: Dialog, logic: Box<dyn CallLogic>) -> Result<Arc<CallLeg>> {
        if dialog.call_id().is_empty() {
            return Err(Error::Config("a local call leg needs a Call-ID".into()));
        }
        let key = dialog.key();
        if self.legs.contains_key(&key) {
            return Err(Error::Custom(format!("call leg {} already exists", key)));
        }

        let handler = CallLegHandler::new(dialog, logic, None, self.self_ref.clone(), self.watcher.clone());
        let leg = CallLeg::new(format!("leg-{}", key), handler);
        self.legs.insert(key.clone(), leg.clone());

        leg.post_event(SessionEvent::Start);
        if let Err(e) = self.processor.start_event_queue(leg.clone() as Arc<dyn ProcessableQueue>) {
            self.legs.remove(&key);
            return Err(e);
        }
        info!(leg = %key, "local call leg added");
        Ok(leg)
    }

    /// Route a received reply; the From-tag of a reply is our local tag
    pub fn dispatch_reply(&self, reply: SipReply) -> bool {
        let key = DialogKey::new(reply.call_id.clone(), reply.from_tag.clone());
        match self.leg(&key) {
            Some(leg) => {
                leg.post_event(SessionEvent::SipReply(reply));
                true
            }
            None => {
                debug!(call_id = %reply.call_id, code = reply.code, "reply for unknown dialog dropped");
                false
            }
        }
    }

    /// Hand a timed out transaction to the leg that owns it
    pub fn dispatch_timeout(&self, expired: ExpiredTransaction) -> bool {
        match self.leg(&expired.dialog) {
            Some(leg) => {
                leg.post_event(SessionEvent::TransactionTimeout(expired));
                true
            }
            None => {
                debug!(dialog = %expired.dialog, method = %expired.method, "timeout for unknown dialog");
                false
            }
        }
    }

    /// Post any event to leg `key`
    pub fn post_event(&self, key: &DialogKey, event: SessionEvent) -> bool {
        match self.leg(key) {
            Some(leg) => {
                leg.post_event(event);
                true
            }
            None => false,
        }
    }

    /// Ask every leg to terminate
    pub fn terminate_all(&self) {
        let legs: Vec<Arc<CallLeg>> = self.legs.iter().map(|l| l.value().clone()).collect();
        if !legs.is_empty() {
            info!(legs = legs.len(), "terminating all call legs");
        }
        for leg in legs {
            leg.post_event(SessionEvent::Terminate);
        }
    }

    pub fn leg(&self, key: &DialogKey) -> Option<Arc<CallLeg>> {
        self.legs.get(key).map(|l| l.value().clone())
    }

    pub fn contains(&self, key: &DialogKey) -> bool {
        self.legs.contains_key(key)
    }

    pub fn keys(&self) -> Vec<DialogKey> {
        self.legs.iter().map(|l| l.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.legs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.legs.is_empty()
    }

    pub(crate) fn remove_leg(&self, key: &DialogKey, remote_key: Option<&RemoteKey>) {
        self.legs.remove(key);
        if let Some(remote_key) = remote_key {
            self.by_remote.remove_if(remote_key, |_, k| k == key);
        }
    }

    fn reject(&self, req: &SipRequest, code: u16, reason: &str) -> Dispatch {
        if let Err(e) = Dialog::reply_error(self.sender.as_ref(), req, code, reason, &Headers::new()) {
            warn!(call_id = %req.call_id, code, "could not send stateless reply: {}", e);
        }
        Dispatch::Rejected { code }
    }
}
