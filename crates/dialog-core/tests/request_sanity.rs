//! Sanity checks, retransmissions and policies on received requests

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{in_dialog_request, incoming_invite, reply_to, Fixture};
use rsems_dialog_core::{
    DialogConfig, DialogError, DialogEventHandler, DialogPolicy, DialogStatus, MessageOptions, RxReply,
    RxRequest, SanityVerdict,
};
use rsems_sip_core::{Method, SipReply, SipRequest};

#[test]
fn test_retransmission_resends_last_reply() -> Result<(), DialogError> {
    let fx = Fixture::new();
    let mut dialog = fx.dialog();
    let invite = incoming_invite(1, "z9hG4bK-inv");
    dialog.on_rx_request(&invite)?;
    dialog.reply(&invite, 180, "Ringing", MessageOptions::default())?;

    assert_eq!(dialog.on_rx_request(&invite)?, RxRequest::Retransmission);
    assert_eq!(fx.sender.reply_codes(), vec![180, 180]);
    assert_eq!(dialog.pending_uas_count(), 1);
    Ok(())
}

#[test]
fn test_invite_while_uas_invite_pending() -> Result<(), DialogError> {
    let fx = Fixture::new();
    let mut dialog = fx.dialog();
    let invite = incoming_invite(1, "z9hG4bK-1");
    dialog.on_rx_request(&invite)?;

    let second = incoming_invite(2, "z9hG4bK-2");
    assert_eq!(dialog.on_rx_request(&second)?, RxRequest::Rejected { code: 500 });

    let reply = fx.sender.last_reply().unwrap();
    assert_eq!(reply.code, 500);
    let retry_after: u32 = reply.hdrs.get("Retry-After").unwrap().parse().unwrap();
    assert!(retry_after <= 10);
    // stateless reply: a generated tag, not the dialog's
    assert!(!reply.to_tag.is_empty());
    assert_eq!(dialog.pending_uas_count(), 1);
    Ok(())
}

#[test]
fn test_invite_while_uac_invite_pending() -> Result<(), DialogError> {
    let fx = Fixture::new();
    let mut dialog = fx.uac_dialog();
    dialog.send_request(Method::Invite, MessageOptions::default())?;
    let invite = fx.sender.last_request().unwrap();
    dialog.on_rx_reply(&reply_to(&invite, 200, "bob-tag"))?;
    dialog.send_request(Method::Invite, MessageOptions::default())?;

    let glare = SipRequest::new(Method::Invite, "sip:alice@10.0.0.1", "uac-call@alice", 5)
        .with_from("<sip:bob@example.com>", "bob-tag")
        .with_to("<sip:alice@example.com>", "alice-tag")
        .with_branch("z9hG4bK-glare");
    assert_eq!(dialog.on_rx_request(&glare)?, RxRequest::Rejected { code: 491 });
    assert_eq!(dialog.status(), DialogStatus::Connected);
    Ok(())
}

#[test]
fn test_lower_remote_cseq_rejected() -> Result<(), DialogError> {
    let fx = Fixture::new();
    let mut dialog = fx.dialog();
    let invite = incoming_invite(5, "z9hG4bK-inv");
    dialog.on_rx_request(&invite)?;
    dialog.reply(&invite, 200, "OK", MessageOptions::default())?;
    let tag = dialog.local_tag().to_string();

    let stale = in_dialog_request(Method::Info, 4, "z9hG4bK-info", &tag);
    assert_eq!(dialog.on_rx_request(&stale)?, RxRequest::Rejected { code: 500 });
    assert_eq!(dialog.remote_cseq(), Some(5));
    Ok(())
}

#[test]
fn test_lower_notify_cseq_tolerated_when_configured() -> Result<(), DialogError> {
    let fx = Fixture::with_config(DialogConfig {
        ignore_notify_lower_cseq: true,
        ..DialogConfig::default()
    });
    let mut dialog = fx.dialog();
    let invite = incoming_invite(5, "z9hG4bK-inv");
    dialog.on_rx_request(&invite)?;
    dialog.reply(&invite, 200, "OK", MessageOptions::default())?;
    let tag = dialog.local_tag().to_string();

    let notify = in_dialog_request(Method::Notify, 3, "z9hG4bK-notify", &tag);
    assert_eq!(dialog.on_rx_request(&notify)?, RxRequest::Accepted);
    // the highest CSeq seen is kept
    assert_eq!(dialog.remote_cseq(), Some(5));
    Ok(())
}

#[test]
fn test_prack_without_reliable_provisional() -> Result<(), DialogError> {
    let fx = Fixture::new();
    let mut dialog = fx.dialog();
    let invite = incoming_invite(1, "z9hG4bK-inv");
    dialog.on_rx_request(&invite)?;
    let tag = dialog.local_tag().to_string();

    let prack = in_dialog_request(Method::Prack, 2, "z9hG4bK-prack", &tag).with_rack(1, 1, Method::Invite);
    assert_eq!(dialog.on_rx_request(&prack)?, RxRequest::Rejected { code: 481 });

    dialog.reply(&invite, 183, "Session Progress", MessageOptions { rseq: 1, ..Default::default() })?;
    assert_eq!(dialog.on_rx_request(&prack)?, RxRequest::Accepted);
    Ok(())
}

struct RejectInfo;

impl DialogPolicy for RejectInfo {
    fn on_rx_req_sanity(&mut self, req: &SipRequest, _status: DialogStatus) -> SanityVerdict {
        if req.method == Method::Info {
            SanityVerdict::reject(403, "Forbidden")
        } else {
            SanityVerdict::Accept
        }
    }
}

struct HideReplies;

impl DialogPolicy for HideReplies {
    fn on_rx_reply_status(&mut self, _reply: &SipReply, _status: DialogStatus) -> bool {
        false
    }
}

#[derive(Default)]
struct Counter {
    requests: AtomicUsize,
    replies: AtomicUsize,
    finished: AtomicUsize,
}

impl DialogEventHandler for Counter {
    fn on_sip_request(&self, _req: &SipRequest) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    fn on_sip_reply(&self, _req: &SipRequest, _reply: &SipReply, _old: DialogStatus) {
        self.replies.fetch_add(1, Ordering::SeqCst);
    }

    fn on_trans_finished(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_policy_rejects_request() -> Result<(), DialogError> {
    let fx = Fixture::new();
    let mut dialog = fx.dialog();
    let counter = Arc::new(Counter::default());
    dialog.set_event_handler(counter.clone());
    dialog.add_policy(Box::new(RejectInfo));

    let invite = incoming_invite(1, "z9hG4bK-inv");
    dialog.on_rx_request(&invite)?;
    dialog.reply(&invite, 200, "OK", MessageOptions::default())?;
    let tag = dialog.local_tag().to_string();

    let info = in_dialog_request(Method::Info, 2, "z9hG4bK-info", &tag);
    assert_eq!(dialog.on_rx_request(&info)?, RxRequest::Rejected { code: 403 });
    assert_eq!(counter.requests.load(Ordering::SeqCst), 1);
    assert_eq!(counter.finished.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_policy_hides_reply_but_bookkeeping_applies() -> Result<(), DialogError> {
    let fx = Fixture::new();
    let mut dialog = fx.uac_dialog();
    let counter = Arc::new(Counter::default());
    dialog.set_event_handler(counter.clone());
    dialog.add_policy(Box::new(HideReplies));

    dialog.send_request(Method::Invite, MessageOptions::default())?;
    let invite = fx.sender.last_request().unwrap();
    let outcome = dialog.on_rx_reply(&reply_to(&invite, 200, "bob-tag"))?;

    assert_eq!(outcome, RxReply::Vetoed { old_status: DialogStatus::Trying });
    assert_eq!(dialog.status(), DialogStatus::Connected);
    assert_eq!(counter.replies.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn test_unmatched_reply_is_dropped() -> Result<(), DialogError> {
    let fx = Fixture::new();
    let mut dialog = fx.uac_dialog();
    let stray = SipReply::from_request(&incoming_invite(9, "z9hG4bK-x"), 200, "OK");
    assert_eq!(dialog.on_rx_reply(&stray)?, RxReply::Dropped);
    assert_eq!(dialog.status(), DialogStatus::Disconnected);
    Ok(())
}

#[test]
fn test_2xx_retransmission_resends_ack() -> Result<(), DialogError> {
    let fx = Fixture::new();
    let mut dialog = fx.uac_dialog();
    dialog.send_request(Method::Invite, MessageOptions::default())?;
    let invite = fx.sender.last_request().unwrap();
    let ok = reply_to(&invite, 200, "bob-tag");
    dialog.on_rx_reply(&ok)?;

    assert_eq!(dialog.on_rx_reply(&ok)?, RxReply::Absorbed);
    assert_eq!(fx.sender.sent_methods(), vec![Method::Invite, Method::Ack, Method::Ack]);
    Ok(())
}

#[test]
fn test_reply_to_unknown_request_fails() {
    let fx = Fixture::new();
    let mut dialog = fx.dialog();
    let invite = incoming_invite(1, "z9hG4bK-inv");
    let err = dialog.reply(&invite, 200, "OK", MessageOptions::default());
    assert!(matches!(err, Err(DialogError::TransactionNotFound { cseq: 1, .. })));
}
