//! Dialog implementation
//!
//! Two entry points drive the state machine: [`Dialog::on_rx_request`] and
//! [`Dialog::on_rx_reply`]. The send side is [`Dialog::send_request`] and
//! [`Dialog::reply`]. Requests rejected before they enter the dialog (sanity
//! failures) are answered through [`Dialog::reply_error`], which is
//! stateless: such a request has no transaction, so it can never be
//! answered with [`Dialog::reply`].

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use rsems_sip_core::{status, Headers, Method, SendFlags, SipReply, SipRequest};
use tracing::{debug, info, trace, warn};

use super::dialog_id::DialogId;
use super::dialog_state::DialogStatus;
use super::policy::{DialogPolicy, SanityVerdict};
use crate::config::DialogConfig;
use crate::errors::{DialogError, DialogResult};
use crate::events::DialogEventHandler;
use crate::transaction::utils::retry_after_secs;
use crate::transaction::{
    generate_branch, generate_tag, DialogKey, ExpiredTransaction, TransactionId, TransactionTable,
    TransactionType,
};
use crate::transport::MessageSender;

/// Initial local CSeq of a fresh dialog
const INITIAL_CSEQ: u32 = 10;

/// What happened to a received request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxRequest {
    /// Entered the dialog; the application should answer it
    Accepted,
    /// Retransmission of a known request; last reply was re-sent
    Retransmission,
    /// Failed a sanity check and was answered statelessly
    Rejected { code: u16 },
    /// A policy stopped processing after the transaction was created
    Vetoed,
    /// Consumed by the dialog layer (ACK for a negative reply, stray ACK)
    Absorbed,
}

/// What happened to a received reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxReply {
    /// Matched and passed to the event handler
    Accepted { old_status: DialogStatus },
    /// Matched and applied, but a policy kept it from the event handler
    Vetoed { old_status: DialogStatus },
    /// No matching transaction, or refused by a sanity check
    Dropped,
    /// Handled by the dialog layer itself (CANCEL replies, 2xx retransmissions)
    Absorbed,
}

/// Extra content and flags for an outgoing message
#[derive(Debug, Clone, Default)]
pub struct MessageOptions {
    pub hdrs: Headers,
    pub content_type: String,
    pub body: Bytes,
    pub flags: SendFlags,
    /// RSeq for a reliable provisional reply
    pub rseq: u32,
}

impl MessageOptions {
    pub fn with_flags(flags: SendFlags) -> Self {
        Self { flags, ..Default::default() }
    }

    pub fn with_body(mut self, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.content_type = content_type.into();
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.hdrs.add(name, value);
        self
    }
}

#[derive(Debug, Clone)]
struct PendingTrans {
    id: TransactionId,
    request: SipRequest,
}

/// A SIP dialog
pub struct Dialog {
    id: DialogId,
    status: DialogStatus,

    call_id: String,
    local_tag: String,
    remote_tag: String,

    /// Our URI, used as Contact
    local_uri: String,
    /// Remote target, Request-URI of in-dialog requests
    remote_uri: String,
    /// Our From/To value
    local_party: String,
    /// Peer's From/To value
    remote_party: String,
    route: String,

    cseq: u32,
    r_cseq: u32,
    r_cseq_i: bool,

    uas_trans: BTreeMap<u32, PendingTrans>,
    uac_trans: BTreeMap<u32, PendingTrans>,
    last_ack: Option<SipRequest>,

    usages: u32,

    config: Arc<DialogConfig>,
    table: Arc<TransactionTable>,
    sender: Arc<dyn MessageSender>,
    handler: Option<Arc<dyn DialogEventHandler>>,
    policies: Vec<Box<dyn DialogPolicy>>,
}

impl Dialog {
    pub fn new(
        table: Arc<TransactionTable>,
        sender: Arc<dyn MessageSender>,
        config: Arc<DialogConfig>,
    ) -> Self {
        Dialog {
            id: DialogId::new(),
            status: DialogStatus::Disconnected,
            call_id: String::new(),
            local_tag: generate_tag(),
            remote_tag: String::new(),
            local_uri: String::new(),
            remote_uri: String::new(),
            local_party: String::new(),
            remote_party: String::new(),
            route: String::new(),
            cseq: INITIAL_CSEQ,
            r_cseq: 0,
            r_cseq_i: false,
            uas_trans: BTreeMap::new(),
            uac_trans: BTreeMap::new(),
            last_ack: None,
            usages: 0,
            config,
            table,
            sender,
            handler: None,
            policies: Vec::new(),
        }
    }

    pub fn set_event_handler(&mut self, handler: Arc<dyn DialogEventHandler>) {
        self.handler = Some(handler);
    }

    /// Append a policy; policies run in insertion order
    pub fn add_policy(&mut self, policy: Box<dyn DialogPolicy>) {
        self.policies.push(policy);
    }

    /// Take identifiers and CSeq from a request we are about to send
    /// outside of this dialog (e.g. the first INVITE built by a B2B leg)
    pub fn init_from_local_request(&mut self, req: &SipRequest) {
        if !req.r_uri.is_empty() {
            self.remote_uri = req.r_uri.clone();
        }
        self.call_id = req.call_id.clone();
        if !req.from_tag.is_empty() {
            self.local_tag = req.from_tag.clone();
        }
        self.local_party = req.from.clone();
        self.remote_party = req.to.clone();
        self.remote_tag = req.to_tag.clone();
        if !req.contact.is_empty() {
            self.local_uri = req.contact.clone();
        }
        self.route = req.route.clone();
        if req.cseq > 0 {
            self.cseq = req.cseq;
        }
        debug!(dialog = %self.id, call_id = %self.call_id, cseq = self.cseq, "dialog initialized from local request");
    }

    // ---------------------------------------------------------------
    // Receive side
    // ---------------------------------------------------------------

    /// Process a received request
    pub fn on_rx_request(&mut self, req: &SipRequest) -> DialogResult<RxRequest> {
        req.validate()?;
        trace!(dialog = %self.id, method = %req.method, cseq = req.cseq, "rx request");

        if req.method == Method::Ack {
            return Ok(self.on_rx_ack(req));
        }

        if let Some(id) = self.table.match_request(req, TransactionType::Uas) {
            match self.table.get(id).and_then(|t| t.last_reply) {
                Some(reply) => {
                    debug!(dialog = %self.id, method = %req.method, cseq = req.cseq, "retransmission, re-sending last reply");
                    if let Err(e) = self.sender.send_reply(&reply, SendFlags::NONE) {
                        warn!(dialog = %self.id, "could not re-send reply: {}", e);
                    }
                }
                None => debug!(dialog = %self.id, method = %req.method, cseq = req.cseq, "retransmission before any reply"),
            }
            return Ok(RxRequest::Retransmission);
        }

        if let Some((code, reason, hdrs)) = self.check_request_sanity(req) {
            Self::reply_error(self.sender.as_ref(), req, code, &reason, &hdrs)?;
            return Ok(RxRequest::Rejected { code });
        }

        if req.method == Method::Cancel {
            return self.on_rx_cancel(req);
        }

        if !self.r_cseq_i || req.cseq > self.r_cseq {
            self.r_cseq = req.cseq;
        }
        self.r_cseq_i = true;
        self.update_dialog_from_request(req);

        let id = self.table.add_trans(req, TransactionType::Uas, &self.key());
        self.uas_trans.insert(req.cseq, PendingTrans { id, request: req.clone() });

        let status = self.status;
        if !self.policies.iter_mut().all(|p| p.on_rx_req_status(req, status)) {
            debug!(dialog = %self.id, method = %req.method, "request vetoed by policy");
            return Ok(RxRequest::Vetoed);
        }

        match req.method {
            Method::Invite if self.status.is_disconnected() => self.set_status(DialogStatus::Trying),
            Method::Bye if !self.status.is_disconnected() => self.set_status(DialogStatus::Disconnecting),
            _ => {}
        }

        if let Some(h) = &self.handler {
            h.on_sip_request(req);
        }
        Ok(RxRequest::Accepted)
    }

    fn check_request_sanity(&mut self, req: &SipRequest) -> Option<(u16, String, Headers)> {
        if req.method != Method::Cancel && self.r_cseq_i && req.cseq <= self.r_cseq {
            if self.config.tolerates_lower_cseq(&req.method) {
                debug!(dialog = %self.id, method = %req.method, cseq = req.cseq, r_cseq = self.r_cseq, "tolerating lower remote CSeq");
            } else {
                warn!(dialog = %self.id, method = %req.method, cseq = req.cseq, r_cseq = self.r_cseq, "remote CSeq lower than last seen");
                return Some((status::SERVER_INTERNAL_ERROR, "Server Internal Error".into(), Headers::new()));
            }
        }

        if req.method == Method::Invite {
            if self.pending_invite(TransactionType::Uas).is_some() {
                let mut hdrs = Headers::new();
                hdrs.add("Retry-After", retry_after_secs().to_string());
                return Some((status::SERVER_INTERNAL_ERROR, "Server Internal Error".into(), hdrs));
            }
            if self.pending_invite(TransactionType::Uac).is_some() {
                return Some((status::REQUEST_PENDING, "Request Pending".into(), Headers::new()));
            }
        }

        if req.method == Method::Prack && self.table.match_1xx_prack(req).is_none() {
            return Some((
                status::CALL_DOES_NOT_EXIST,
                status::reason_phrase(status::CALL_DOES_NOT_EXIST).into(),
                Headers::new(),
            ));
        }

        let status = self.status;
        for policy in self.policies.iter_mut() {
            if let SanityVerdict::Reject { code, reason, hdrs } = policy.on_rx_req_sanity(req, status) {
                return Some((code, reason, hdrs));
            }
        }
        None
    }

    fn update_dialog_from_request(&mut self, req: &SipRequest) {
        if self.call_id.is_empty() {
            self.call_id = req.call_id.clone();
        }
        if self.remote_tag.is_empty() && !req.from_tag.is_empty() {
            self.remote_tag = req.from_tag.clone();
            self.remote_party = req.from.clone();
            self.local_party = req.to.clone();
        }
        if !req.contact.is_empty() && (req.method.creates_dialog() || req.method == Method::Update) {
            self.remote_uri = req.contact.clone();
        }
        if self.route.is_empty() && self.status.is_disconnected() {
            let record_route: Vec<&str> = req.hdrs.get_all("Record-Route").collect();
            if !record_route.is_empty() {
                self.route = record_route.join(", ");
            }
        }
    }

    fn on_rx_ack(&mut self, ack: &SipRequest) -> RxRequest {
        match self.table.match_request(ack, TransactionType::Uas) {
            Some(id) if self.table.match_200_ack(id, ack) => {
                debug!(dialog = %self.id, cseq = ack.cseq, "received ACK for 2xx");
                if let Some(h) = &self.handler {
                    h.on_sip_request(ack);
                }
                RxRequest::Accepted
            }
            Some(_) => {
                trace!(dialog = %self.id, cseq = ack.cseq, "ACK for negative reply absorbed");
                RxRequest::Absorbed
            }
            None => {
                debug!(dialog = %self.id, cseq = ack.cseq, "ACK without matching transaction");
                RxRequest::Absorbed
            }
        }
    }

    fn on_rx_cancel(&mut self, cancel: &SipRequest) -> DialogResult<RxRequest> {
        let invite_pending = self
            .uas_trans
            .get(&cancel.cseq)
            .is_some_and(|p| p.request.method == Method::Invite);

        let id = self.table.add_trans(cancel, TransactionType::Uas, &self.key());
        let code = if invite_pending { status::OK } else { status::CALL_DOES_NOT_EXIST };
        let mut reply = SipReply::from_request(cancel, code, "");
        if reply.to_tag.is_empty() {
            reply.to_tag = self.local_tag.clone();
        }
        self.sender.send_reply(&reply, SendFlags::NONE)?;
        self.table.update_reply(id, &reply);

        if !invite_pending {
            debug!(dialog = %self.id, cseq = cancel.cseq, "CANCEL without pending INVITE");
            return Ok(RxRequest::Rejected { code });
        }

        if self.status.is_pending_setup() {
            self.set_status(DialogStatus::Cancelling);
        }
        if let Some(h) = &self.handler {
            h.on_sip_request(cancel);
        }
        Ok(RxRequest::Accepted)
    }

    /// Process a received reply
    pub fn on_rx_reply(&mut self, reply: &SipReply) -> DialogResult<RxReply> {
        reply.validate()?;

        let Some(id) = self.table.match_reply(reply) else {
            if reply.cseq_method == Method::Invite && reply.is_success() {
                if let Some(ack) = self.last_ack.as_ref().filter(|a| a.cseq == reply.cseq) {
                    debug!(dialog = %self.id, cseq = reply.cseq, "2xx retransmission, re-sending ACK");
                    self.sender.send_request(ack, SendFlags::NONE)?;
                    return Ok(RxReply::Absorbed);
                }
            }
            debug!(dialog = %self.id, code = reply.code, cseq = reply.cseq, method = %reply.cseq_method, "no transaction for reply, dropping");
            return Ok(RxReply::Dropped);
        };

        if reply.cseq_method == Method::Cancel {
            if reply.is_final() {
                self.table.remove(id);
            }
            trace!(dialog = %self.id, code = reply.code, "reply to CANCEL absorbed");
            return Ok(RxReply::Absorbed);
        }

        self.handle_reply(reply, Some(id))
    }

    fn handle_reply(&mut self, reply: &SipReply, id: Option<TransactionId>) -> DialogResult<RxReply> {
        let Some(request) = self
            .uac_trans
            .get(&reply.cseq)
            .filter(|p| p.request.method == reply.cseq_method)
            .map(|p| p.request.clone())
        else {
            debug!(dialog = %self.id, cseq = reply.cseq, "reply for CSeq not pending in dialog, dropping");
            return Ok(RxReply::Dropped);
        };

        let status = self.status;
        if !self.policies.iter_mut().all(|p| p.on_rx_reply_sanity(reply, status)) {
            debug!(dialog = %self.id, code = reply.code, "reply refused by policy");
            return Ok(RxReply::Dropped);
        }

        if reply.cseq_method == Method::Invite && !reply.to_tag.is_empty() && reply.code > 100 {
            if self.remote_tag.is_empty() {
                self.remote_tag = reply.to_tag.clone();
            } else if reply.to_tag != self.remote_tag {
                if !self.config.accept_forked_dialogs {
                    warn!(dialog = %self.id, to_tag = %reply.to_tag, "reply from forked dialog refused");
                    return Ok(RxReply::Dropped);
                }
                if self.status.is_pending_setup() || self.status == DialogStatus::Cancelling {
                    info!(dialog = %self.id, to_tag = %reply.to_tag, "switching to forked dialog");
                    self.remote_tag = reply.to_tag.clone();
                }
            }
        }

        let old_status = self.status;
        if let Some(id) = id {
            if reply.is_final() {
                self.table.remove(id);
            } else {
                self.table.update_reply(id, reply);
            }
        }
        if reply.is_final() {
            self.uac_trans.remove(&reply.cseq);
        }

        match reply.cseq_method {
            Method::Invite => self.update_status_from_invite_reply(reply)?,
            Method::Bye if reply.is_final() => self.set_status(DialogStatus::Disconnected),
            _ => {}
        }

        if matches!(reply.code, status::REQUEST_TIMEOUT | status::CALL_DOES_NOT_EXIST) && !request.to_tag.is_empty() {
            info!(dialog = %self.id, code = reply.code, method = %reply.cseq_method, "remote end disappeared");
            if let Some(h) = &self.handler {
                h.on_remote_disappeared(reply);
            }
        }

        let status = self.status;
        let pass = self.policies.iter_mut().all(|p| p.on_rx_reply_status(reply, status));
        if let Some(h) = &self.handler {
            if pass {
                h.on_sip_reply(&request, reply, old_status);
            }
            if reply.is_final() && !self.has_pending_transactions() {
                h.on_trans_finished();
            }
        }

        Ok(if pass { RxReply::Accepted { old_status } } else { RxReply::Vetoed { old_status } })
    }

    fn update_status_from_invite_reply(&mut self, reply: &SipReply) -> DialogResult<()> {
        let status = self.status;

        if reply.is_provisional() {
            match status {
                DialogStatus::Trying | DialogStatus::Proceeding => {
                    if reply.code > status::TRYING && !reply.to_tag.is_empty() {
                        self.set_status(DialogStatus::Early);
                    } else if status == DialogStatus::Trying {
                        self.set_status(DialogStatus::Proceeding);
                    }
                }
                _ => {}
            }
            return Ok(());
        }

        if reply.is_success() {
            if !reply.contact.is_empty() {
                self.remote_uri = reply.contact.clone();
            }
            if self.route.is_empty() && status != DialogStatus::Connected {
                let mut record_route: Vec<&str> = reply.hdrs.get_all("Record-Route").collect();
                record_route.reverse();
                if !record_route.is_empty() {
                    self.route = record_route.join(", ");
                }
            }

            if status != DialogStatus::Disconnecting {
                self.set_status(DialogStatus::Connected);
            }
            if self.config.auto_ack_2xx {
                self.send_ack(reply.cseq)?;
            }
            if status == DialogStatus::Cancelling {
                info!(dialog = %self.id, "2xx received after CANCEL, sending BYE");
                self.send_request(Method::Bye, MessageOptions::default())?;
            }
            return Ok(());
        }

        // negative final reply; a failed re-INVITE leaves the call up
        if status != DialogStatus::Connected && status != DialogStatus::Disconnecting {
            self.set_status(DialogStatus::Disconnected);
        }
        Ok(())
    }

    /// A transaction of this dialog timed out while waiting for its final reply
    pub fn on_trans_timeout(&mut self, expired: &ExpiredTransaction) -> DialogResult<()> {
        match expired.trans_type {
            TransactionType::Uac => {
                if expired.method == Method::Cancel {
                    return Ok(());
                }
                let pending = self
                    .uac_trans
                    .get(&expired.cseq)
                    .is_some_and(|p| p.request.method == expired.method);
                if !pending {
                    return Ok(());
                }
                warn!(dialog = %self.id, method = %expired.method, cseq = expired.cseq, "request timed out");
                let reply = SipReply::from_request(&expired.request, status::REQUEST_TIMEOUT, "Request Timeout");
                self.handle_reply(&reply, None)?;
            }
            TransactionType::Uas => {
                if let Some(p) = self.uas_trans.remove(&expired.cseq) {
                    warn!(dialog = %self.id, method = %p.request.method, cseq = expired.cseq, "received request never answered");
                    if p.request.method == Method::Invite && self.status.is_pending_setup() {
                        self.set_status(DialogStatus::Disconnected);
                    }
                    if !self.has_pending_transactions() {
                        if let Some(h) = &self.handler {
                            h.on_trans_finished();
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Send side
    // ---------------------------------------------------------------

    /// Send a request within the dialog. Returns the CSeq used.
    ///
    /// The local CSeq is advanced only once the transport accepted the
    /// request.
    pub fn send_request(&mut self, method: Method, opts: MessageOptions) -> DialogResult<u32> {
        match method {
            Method::Ack => {
                return Err(DialogError::InvalidState { operation: "send ACK as a new request", status: self.status });
            }
            Method::Cancel => return self.cancel(),
            _ => {}
        }

        let cseq = self.cseq;
        let next_cseq = cseq.checked_add(1).ok_or(DialogError::CSeqExhausted)?;

        let mut req = self.build_request(method.clone(), cseq, generate_branch());
        req.hdrs = opts.hdrs;
        req.content_type = opts.content_type;
        req.body = opts.body;

        let mut flags = opts.flags;
        for policy in self.policies.iter_mut() {
            policy.on_tx_request(&mut req, &mut flags)?;
        }
        if let Some(h) = &self.handler {
            h.on_send_request(&mut req, &mut flags);
        }
        self.decorate_request(&mut req, flags);

        let id = self.table.add_trans(&req, TransactionType::Uac, &self.key());
        if let Err(e) = self.sender.send_request(&req, flags) {
            self.table.remove(id);
            warn!(dialog = %self.id, method = %method, "sending request failed: {}", e);
            if let Some(h) = &self.handler {
                h.on_failure(&e);
            }
            return Err(e);
        }

        self.uac_trans.insert(cseq, PendingTrans { id, request: req.clone() });
        self.cseq = next_cseq;

        match method {
            Method::Invite if self.status.is_disconnected() => self.set_status(DialogStatus::Trying),
            Method::Bye if !self.status.is_disconnected() => self.set_status(DialogStatus::Disconnecting),
            _ => {}
        }

        if let Some(h) = &self.handler {
            h.on_request_sent(&req);
        }
        Ok(cseq)
    }

    fn build_request(&self, method: Method, cseq: u32, branch: String) -> SipRequest {
        let mut req = SipRequest::new(method, self.remote_uri.clone(), self.call_id.clone(), cseq)
            .with_from(self.local_party.clone(), self.local_tag.clone())
            .with_to(self.remote_party.clone(), self.remote_tag.clone())
            .with_branch(branch);
        req.max_forwards = self.config.max_forwards;
        req.route = self.route.clone();
        req
    }

    fn decorate_request(&self, req: &mut SipRequest, flags: SendFlags) {
        if flags.verbatim {
            return;
        }
        if !flags.no_contact && req.contact.is_empty() && !self.local_uri.is_empty() {
            req.contact = self.local_uri.clone();
        }
        if let Some(signature) = &self.config.signature {
            req.hdrs.set("User-Agent", signature.clone());
        }
        if let Some(proxy) = &self.config.outbound_proxy {
            if req.route.is_empty() {
                req.route = format!("<{};lr>", proxy);
            } else if self.config.force_outbound_proxy {
                req.route = format!("<{};lr>, {}", proxy, req.route);
            }
        }
    }

    /// Answer a request that entered the dialog through [`on_rx_request`](Self::on_rx_request)
    pub fn reply(&mut self, req: &SipRequest, code: u16, reason: &str, opts: MessageOptions) -> DialogResult<()> {
        let id = self
            .uas_trans
            .get(&req.cseq)
            .filter(|p| p.request.method == req.method)
            .map(|p| p.id)
            .ok_or_else(|| DialogError::TransactionNotFound { method: req.method.to_string(), cseq: req.cseq })?;

        let mut flags = opts.flags;
        let mut reply = SipReply::from_request(req, code, reason);
        if !flags.no_tag && reply.to_tag.is_empty() && code > status::TRYING {
            reply.to_tag = self.local_tag.clone();
        }
        reply.hdrs = opts.hdrs;
        reply.content_type = opts.content_type;
        reply.body = opts.body;
        reply.rseq = opts.rseq;

        for policy in self.policies.iter_mut() {
            policy.on_tx_reply(req, &mut reply, &mut flags)?;
        }
        if let Some(h) = &self.handler {
            h.on_send_reply(req, &mut reply, &mut flags);
        }
        if !flags.verbatim {
            if !flags.no_contact && reply.contact.is_empty() && req.method.creates_dialog() && code > status::TRYING && code < 300 {
                reply.contact = self.local_uri.clone();
            }
            if let Some(signature) = &self.config.signature {
                reply.hdrs.set("Server", signature.clone());
            }
        }

        if let Err(e) = self.sender.send_reply(&reply, flags) {
            warn!(dialog = %self.id, code, "sending reply failed: {}", e);
            if let Some(h) = &self.handler {
                h.on_failure(&e);
            }
            return Err(e);
        }
        self.table.update_reply(id, &reply);

        match req.method {
            Method::Invite => self.update_status_from_sent_invite_reply(code),
            Method::Bye if status::is_final(code) => self.set_status(DialogStatus::Disconnected),
            _ => {}
        }

        if status::is_final(code) {
            self.uas_trans.remove(&req.cseq);
        }
        if let Some(h) = &self.handler {
            h.on_reply_sent(req, &reply);
            if status::is_final(code) && !self.has_pending_transactions() {
                h.on_trans_finished();
            }
        }
        Ok(())
    }

    fn update_status_from_sent_invite_reply(&mut self, code: u16) {
        let status = self.status;
        if code == status::TRYING {
            if status == DialogStatus::Trying {
                self.set_status(DialogStatus::Proceeding);
            }
        } else if status::is_provisional(code) {
            if matches!(status, DialogStatus::Trying | DialogStatus::Proceeding) {
                self.set_status(DialogStatus::Early);
            }
        } else if status::is_success(code) {
            if status != DialogStatus::Disconnecting {
                self.set_status(DialogStatus::Connected);
            }
        } else if status != DialogStatus::Connected && status != DialogStatus::Disconnecting {
            self.set_status(DialogStatus::Disconnected);
        }
    }

    /// Answer a request statelessly.
    ///
    /// Used for requests that never entered a dialog's transaction map; a
    /// To-tag is generated if the request has none.
    pub fn reply_error(
        sender: &dyn MessageSender,
        req: &SipRequest,
        code: u16,
        reason: &str,
        hdrs: &Headers,
    ) -> DialogResult<()> {
        let mut reply = SipReply::from_request(req, code, reason);
        if reply.to_tag.is_empty() {
            reply.to_tag = generate_tag();
        }
        for h in hdrs.iter() {
            reply.hdrs.add(h.name.clone(), h.value.clone());
        }
        debug!(call_id = %req.call_id, method = %req.method, code, "stateless error reply");
        sender.send_reply(&reply, SendFlags::NONE)
    }

    /// Send ACK for the 2xx of INVITE `inv_cseq`; never enters the table
    pub fn send_ack(&mut self, inv_cseq: u32) -> DialogResult<()> {
        let ack = self.build_request(Method::Ack, inv_cseq, generate_branch());
        self.sender.send_request(&ack, SendFlags::NONE)?;
        trace!(dialog = %self.id, cseq = inv_cseq, "ACK sent");
        self.last_ack = Some(ack);
        Ok(())
    }

    /// Cancel the pending outgoing INVITE. Returns its CSeq.
    ///
    /// The CANCEL reuses the INVITE's CSeq and branch and is tracked in the
    /// transaction table only.
    pub fn cancel(&mut self) -> DialogResult<u32> {
        let (cseq, invite) = self
            .pending_invite(TransactionType::Uac)
            .map(|(cseq, p)| (cseq, p.request.clone()))
            .ok_or(DialogError::NoPendingInvite)?;

        if self.table.find_uac_trans(&self.key(), cseq).is_none() {
            return Err(DialogError::NoPendingInvite);
        }

        let mut cancel = SipRequest::new(Method::Cancel, invite.r_uri.clone(), invite.call_id.clone(), cseq)
            .with_from(invite.from.clone(), invite.from_tag.clone())
            .with_to(invite.to.clone(), invite.to_tag.clone())
            .with_branch(invite.via_branch.clone());
        cancel.route = invite.route.clone();
        cancel.max_forwards = self.config.max_forwards;

        let id = self.table.add_trans(&cancel, TransactionType::Uac, &self.key());
        if let Err(e) = self.sender.send_request(&cancel, SendFlags::NONE) {
            self.table.remove(id);
            return Err(e);
        }

        if self.status.is_pending_setup() {
            self.set_status(DialogStatus::Cancelling);
        }
        debug!(dialog = %self.id, cseq, "CANCEL sent");
        Ok(cseq)
    }

    /// End the call from our side, whatever stage it is in
    pub fn bye(&mut self) -> DialogResult<()> {
        let status = self.status;
        match status {
            DialogStatus::Disconnected | DialogStatus::Disconnecting | DialogStatus::Cancelling => {}
            _ if self.pending_invite(TransactionType::Uac).is_some() && status != DialogStatus::Connected => {
                self.cancel()?;
            }
            _ if self.pending_invite(TransactionType::Uas).is_some() && status != DialogStatus::Connected => {
                let invite = self
                    .pending_invite(TransactionType::Uas)
                    .map(|(_, p)| p.request.clone())
                    .ok_or(DialogError::NoPendingInvite)?;
                self.reply(&invite, status::REQUEST_TERMINATED, "Request Terminated", MessageOptions::default())?;
            }
            DialogStatus::Connected | DialogStatus::Early => {
                self.send_request(Method::Bye, MessageOptions::default())?;
            }
            _ => self.set_status(DialogStatus::Disconnected),
        }

        if let Some(h) = &self.handler {
            h.on_local_terminate(status);
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Termination
    // ---------------------------------------------------------------

    /// Answer every pending received request with 481
    pub fn term_uas_trans(&mut self) {
        let pending = std::mem::take(&mut self.uas_trans);
        for (cseq, p) in pending {
            let mut reply = SipReply::from_request(&p.request, status::CALL_DOES_NOT_EXIST, "");
            if reply.to_tag.is_empty() {
                reply.to_tag = self.local_tag.clone();
            }
            if let Err(e) = self.sender.send_reply(&reply, SendFlags::NONE) {
                warn!(dialog = %self.id, cseq, "could not terminate UAS transaction: {}", e);
            }
            self.table.update_reply(p.id, &reply);
        }
    }

    /// Forget every pending sent request
    pub fn term_uac_trans(&mut self) {
        let pending = std::mem::take(&mut self.uac_trans);
        for (_, p) in pending {
            self.table.remove(p.id);
        }
    }

    /// Drop all pending transactions without sending anything
    pub fn drop_transactions(&mut self) {
        for (_, p) in std::mem::take(&mut self.uas_trans) {
            self.table.remove(p.id);
        }
        for (_, p) in std::mem::take(&mut self.uac_trans) {
            self.table.remove(p.id);
        }
    }

    /// Terminate both sides' transactions. Idempotent.
    pub fn finalize(&mut self) {
        self.term_uas_trans();
        self.term_uac_trans();
    }

    // ---------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------

    pub fn id(&self) -> DialogId {
        self.id
    }

    pub fn status(&self) -> DialogStatus {
        self.status
    }

    pub fn set_status(&mut self, status: DialogStatus) {
        if self.status != status {
            debug!(dialog = %self.id, "status change: {} -> {}", self.status, status);
            self.status = status;
        }
    }

    pub fn key(&self) -> DialogKey {
        DialogKey::new(self.call_id.clone(), self.local_tag.clone())
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn set_call_id(&mut self, call_id: impl Into<String>) {
        self.call_id = call_id.into();
    }

    pub fn local_tag(&self) -> &str {
        &self.local_tag
    }

    pub fn set_local_tag(&mut self, tag: impl Into<String>) {
        self.local_tag = tag.into();
    }

    pub fn remote_tag(&self) -> &str {
        &self.remote_tag
    }

    pub fn set_remote_tag(&mut self, tag: impl Into<String>) {
        self.remote_tag = tag.into();
    }

    pub fn local_uri(&self) -> &str {
        &self.local_uri
    }

    pub fn set_local_uri(&mut self, uri: impl Into<String>) {
        self.local_uri = uri.into();
    }

    pub fn remote_uri(&self) -> &str {
        &self.remote_uri
    }

    pub fn set_remote_uri(&mut self, uri: impl Into<String>) {
        self.remote_uri = uri.into();
    }

    pub fn set_local_party(&mut self, party: impl Into<String>) {
        self.local_party = party.into();
    }

    pub fn set_remote_party(&mut self, party: impl Into<String>) {
        self.remote_party = party.into();
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn set_route(&mut self, route: impl Into<String>) {
        self.route = route.into();
    }

    /// Next local CSeq
    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    /// Last remote CSeq, `None` before the first request
    pub fn remote_cseq(&self) -> Option<u32> {
        self.r_cseq_i.then_some(self.r_cseq)
    }

    pub fn has_pending_transactions(&self) -> bool {
        !self.uas_trans.is_empty() || !self.uac_trans.is_empty()
    }

    pub fn pending_uas_count(&self) -> usize {
        self.uas_trans.len()
    }

    pub fn pending_uac_count(&self) -> usize {
        self.uac_trans.len()
    }

    /// Handle of the pending UAC transaction for `cseq`
    pub fn uac_transaction(&self, cseq: u32) -> Option<TransactionId> {
        self.uac_trans.get(&cseq).map(|p| p.id)
    }

    /// Handle of the pending UAS transaction for `cseq`
    pub fn uas_transaction(&self, cseq: u32) -> Option<TransactionId> {
        self.uas_trans.get(&cseq).map(|p| p.id)
    }

    fn pending_invite(&self, side: TransactionType) -> Option<(u32, &PendingTrans)> {
        let map = match side {
            TransactionType::Uac => &self.uac_trans,
            TransactionType::Uas => &self.uas_trans,
        };
        map.iter()
            .rev()
            .find(|(_, p)| p.request.method == Method::Invite)
            .map(|(cseq, p)| (*cseq, p))
    }

    pub fn inc_usages(&mut self) {
        self.usages += 1;
    }

    pub fn dec_usages(&mut self) {
        self.usages = self.usages.saturating_sub(1);
    }

    pub fn usages(&self) -> u32 {
        self.usages
    }

    /// No usages, no pending transactions and disconnected
    pub fn is_disposable(&self) -> bool {
        self.usages == 0 && !self.has_pending_transactions() && self.status.is_disconnected()
    }

    /// Log the dialog state at debug level
    pub fn dump(&self) {
        debug!(
            dialog = %self.id,
            status = %self.status,
            call_id = %self.call_id,
            local_tag = %self.local_tag,
            remote_tag = %self.remote_tag,
            cseq = self.cseq,
            r_cseq = ?self.remote_cseq(),
            usages = self.usages,
            "dialog"
        );
        for (cseq, p) in &self.uas_trans {
            debug!(dialog = %self.id, cseq, method = %p.request.method, trans = %p.id, "  pending UAS");
        }
        for (cseq, p) in &self.uac_trans {
            debug!(dialog = %self.id, cseq, method = %p.request.method, trans = %p.id, "  pending UAC");
        }
    }
}

impl std::fmt::Debug for Dialog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialog")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("call_id", &self.call_id)
            .field("local_tag", &self.local_tag)
            .field("remote_tag", &self.remote_tag)
            .field("cseq", &self.cseq)
            .field("pending_uas", &self.uas_trans.len())
            .field("pending_uac", &self.uac_trans.len())
            .finish()
    }
}
