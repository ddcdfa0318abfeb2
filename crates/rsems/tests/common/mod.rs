#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rsems::config::CallControlConfig;
use rsems::dialog_core::{DialogConfig, TransactionConfig};
use rsems::infra_common::EventQueueProcessor;
use rsems::media_core::MediaSchedulerConfig;
use rsems::prelude::*;
use rsems::sip_core::SendFlags;

/// Records every message the server sends
#[derive(Default)]
pub struct RecordingSender {
    pub requests: Mutex<Vec<SipRequest>>,
    pub replies: Mutex<Vec<SipReply>>,
}

impl RecordingSender {
    pub fn reply_codes(&self) -> Vec<u16> {
        self.replies.lock().iter().map(|r| r.code).collect()
    }

    pub fn last_reply(&self) -> Option<SipReply> {
        self.replies.lock().last().cloned()
    }

    pub fn sent_methods(&self) -> Vec<Method> {
        self.requests.lock().iter().map(|r| r.method.clone()).collect()
    }
}

impl MessageSender for RecordingSender {
    fn send_request(&self, req: &SipRequest, _flags: SendFlags) -> DialogResult<()> {
        self.requests.lock().push(req.clone());
        Ok(())
    }

    fn send_reply(&self, reply: &SipReply, _flags: SendFlags) -> DialogResult<()> {
        self.replies.lock().push(reply.clone());
        Ok(())
    }
}

/// Answers every request with 200; refuses request URIs containing "busy"
pub struct AnsweringFactory;

struct Answering;

impl CallLogic for Answering {
    fn on_request(&mut self, dialog: &mut Dialog, req: &SipRequest) -> DialogResult<()> {
        if req.method == Method::Ack {
            return Ok(());
        }
        dialog.reply(req, 200, "OK", MessageOptions::default())
    }
}

impl SessionFactory for AnsweringFactory {
    fn create(&self, req: &SipRequest, _services: &SessionServices) -> Result<Box<dyn CallLogic>, Refusal> {
        if req.r_uri.contains("busy") {
            return Err(Refusal::new(486, "Busy Here"));
        }
        Ok(Box::new(Answering))
    }
}

/// Sends an INVITE as soon as the leg starts
pub struct Caller;

impl CallLogic for Caller {
    fn on_start(&mut self, dialog: &mut Dialog) -> DialogResult<()> {
        dialog.send_request(Method::Invite, MessageOptions::default()).map(|_| ())
    }

    fn on_request(&mut self, _dialog: &mut Dialog, _req: &SipRequest) -> DialogResult<()> {
        Ok(())
    }
}

pub struct Harness {
    pub sender: Arc<RecordingSender>,
    pub table: Arc<TransactionTable>,
    pub processor: Arc<EventQueueProcessor>,
    pub media: Arc<MediaScheduler>,
    pub container: Arc<SessionContainer>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_factory(Arc::new(AnsweringFactory))
    }

    pub fn with_factory(factory: Arc<dyn SessionFactory>) -> Self {
        let sender = Arc::new(RecordingSender::default());
        let table = Arc::new(
            TransactionTable::new(&TransactionConfig { bucket_count: 64, t1_ms: 500 }).expect("valid table config"),
        );
        let processor = Arc::new(EventQueueProcessor::new(2).expect("worker pool"));
        let media = Arc::new(MediaScheduler::start(&MediaSchedulerConfig::default()).expect("media scheduler"));
        let services = SessionServices {
            media: media.clone(),
            limiter: Arc::new(ParallelCallLimiter::new(CallControlConfig::default())),
        };
        let container = SessionContainer::new(
            table.clone(),
            sender.clone(),
            Arc::new(DialogConfig::default()),
            processor.clone(),
            factory,
            services,
            None,
        );
        Harness { sender, table, processor, media, container }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.processor.stop();
        self.media.stop();
    }
}

pub fn invite(call_id: &str, r_uri: &str, cseq: u32, branch: &str) -> SipRequest {
    SipRequest::new(Method::Invite, r_uri, call_id, cseq)
        .with_from("<sip:bob@example.com>", "bob-tag")
        .with_to(format!("<{}>", r_uri), "")
        .with_branch(branch)
}

pub fn in_dialog(method: Method, call_id: &str, cseq: u32, branch: &str, to_tag: &str) -> SipRequest {
    SipRequest::new(method, "sip:service@rsems", call_id, cseq)
        .with_from("<sip:bob@example.com>", "bob-tag")
        .with_to("<sip:service@rsems>", to_tag)
        .with_branch(branch)
}

/// Poll `cond` until it holds or two seconds pass
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Admits at most `max_parallel_calls` callers per From URI
pub struct LimitedFactory;

impl SessionFactory for LimitedFactory {
    fn create(&self, req: &SipRequest, services: &SessionServices) -> Result<Box<dyn CallLogic>, Refusal> {
        match services.limiter.start(&req.from, &req.from_tag) {
            Admission::Admit => Ok(Box::new(Answering)),
            Admission::Refuse { code, reason } => Err(Refusal::new(code, reason)),
        }
    }
}

/// Accepts every request and never answers it
pub struct SilentFactory;

struct Silent;

impl CallLogic for Silent {
    fn on_request(&mut self, _dialog: &mut Dialog, _req: &SipRequest) -> DialogResult<()> {
        Ok(())
    }
}

impl SessionFactory for SilentFactory {
    fn create(&self, _req: &SipRequest, _services: &SessionServices) -> Result<Box<dyn CallLogic>, Refusal> {
        Ok(Box::new(Silent))
    }
}
