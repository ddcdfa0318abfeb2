//! Routing of received messages through the session container

mod common;

use std::sync::Arc;

use common::{in_dialog, invite, wait_until, Caller, Harness, LimitedFactory};
use rsems::dialog_core::DialogKey;
use rsems::prelude::*;

#[test]
fn test_unknown_in_dialog_request_gets_481() {
    let h = Harness::new();
    let bye = in_dialog(Method::Bye, "nobody@bob", 2, "z9hG4bK-bye", "missing-tag");

    assert_eq!(h.container.dispatch_request(bye), Dispatch::Rejected { code: 481 });
    assert_eq!(h.sender.reply_codes(), vec![481]);
    assert!(h.container.is_empty());
}

#[test]
fn test_stray_ack_is_dropped() {
    let h = Harness::new();
    let ack = in_dialog(Method::Ack, "nobody@bob", 1, "z9hG4bK-ack", "missing-tag");
    assert_eq!(h.container.dispatch_request(ack), Dispatch::Dropped);

    let mut initial_ack = invite("nobody@bob", "sip:service@rsems", 1, "z9hG4bK-ack2");
    initial_ack.method = Method::Ack;
    assert_eq!(h.container.dispatch_request(initial_ack), Dispatch::Dropped);
    assert!(h.sender.reply_codes().is_empty());
}

#[test]
fn test_cancel_without_dialog_gets_481() {
    let h = Harness::new();
    let mut cancel = invite("nobody@bob", "sip:service@rsems", 1, "z9hG4bK-c");
    cancel.method = Method::Cancel;

    assert_eq!(h.container.dispatch_request(cancel), Dispatch::Rejected { code: 481 });
    assert!(h.container.is_empty());
}

#[test]
fn test_factory_refusal_answered_statelessly() {
    let h = Harness::new();
    let req = invite("busy@bob", "sip:busy@rsems", 1, "z9hG4bK-busy");

    assert_eq!(h.container.dispatch_request(req), Dispatch::Rejected { code: 486 });
    let reply = h.sender.last_reply().unwrap();
    assert_eq!(reply.code, 486);
    assert_eq!(reply.reason, "Busy Here");
    assert!(h.container.is_empty());
}

#[test]
fn test_invite_creates_leg_and_bye_releases_it() {
    let h = Harness::new();
    let call_id = "call-1@bob";

    assert_eq!(
        h.container.dispatch_request(invite(call_id, "sip:service@rsems", 1, "z9hG4bK-inv")),
        Dispatch::Created
    );
    assert!(wait_until(|| h.sender.reply_codes() == vec![200]));
    assert_eq!(h.container.len(), 1);

    let ok = h.sender.last_reply().unwrap();
    assert!(!ok.to_tag.is_empty());
    let key = DialogKey::new(call_id, ok.to_tag.clone());
    assert!(h.container.contains(&key));

    // retransmission of the initial INVITE reaches the same leg
    assert_eq!(
        h.container.dispatch_request(invite(call_id, "sip:service@rsems", 1, "z9hG4bK-inv")),
        Dispatch::Routed
    );
    assert!(wait_until(|| h.sender.reply_codes() == vec![200, 200]));
    assert_eq!(h.container.len(), 1);

    let ack = in_dialog(Method::Ack, call_id, 1, "z9hG4bK-inv", &ok.to_tag);
    assert_eq!(h.container.dispatch_request(ack), Dispatch::Routed);

    let bye = in_dialog(Method::Bye, call_id, 2, "z9hG4bK-bye", &ok.to_tag);
    assert_eq!(h.container.dispatch_request(bye), Dispatch::Routed);
    assert!(wait_until(|| h.container.is_empty()));
    assert_eq!(h.sender.reply_codes(), vec![200, 200, 200]);
}

#[test]
fn test_out_of_dialog_request_leg_is_released_after_reply() {
    let h = Harness::new();
    let options = SipRequest::new(Method::Options, "sip:service@rsems", "ping@bob", 1)
        .with_from("<sip:bob@example.com>", "bob-tag")
        .with_to("<sip:service@rsems>", "")
        .with_branch("z9hG4bK-opt");

    assert_eq!(h.container.dispatch_request(options), Dispatch::Created);
    assert!(wait_until(|| h.sender.reply_codes() == vec![200]));
    assert!(wait_until(|| h.container.is_empty()));
}

#[test]
fn test_reply_for_unknown_dialog_is_dropped() {
    let h = Harness::new();
    let req = invite("gone@bob", "sip:service@rsems", 1, "z9hG4bK-x");
    let reply = SipReply::from_request(&req, 200, "");
    assert!(!h.container.dispatch_reply(reply));
}

#[test]
fn test_local_leg_needs_call_id() {
    let h = Harness::new();
    let dialog = h.container.new_dialog();
    assert!(h.container.add_leg(dialog, Box::new(Caller)).is_err());
}

#[test]
fn test_local_leg_sends_invite_and_receives_reply() {
    let h = Harness::new();
    let mut dialog = h.container.new_dialog();
    dialog.set_call_id("out-1@rsems");
    dialog.set_local_tag("rsems-tag");
    dialog.set_local_party("<sip:service@rsems>");
    dialog.set_remote_party("<sip:carol@example.com>");
    dialog.set_remote_uri("sip:carol@example.com");
    dialog.set_local_uri("<sip:service@10.0.0.1>");
    let key = dialog.key();

    let leg = h.container.add_leg(dialog, Box::new(Caller)).unwrap();

    let mut duplicate = h.container.new_dialog();
    duplicate.set_call_id("out-1@rsems");
    duplicate.set_local_tag("rsems-tag");
    assert!(h.container.add_leg(duplicate, Box::new(Caller)).is_err());
    assert!(wait_until(|| h.sender.sent_methods() == vec![Method::Invite]));

    let sent = h.sender.requests.lock()[0].clone();
    assert_eq!(sent.call_id, key.call_id);
    assert_eq!(sent.from_tag, key.local_tag);

    let ok = SipReply::from_request(&sent, 200, "").with_to_tag("carol-tag");
    assert!(h.container.dispatch_reply(ok));
    assert!(wait_until(|| h.sender.sent_methods() == vec![Method::Invite, Method::Ack]));
    assert!(wait_until(|| leg.with_handler(|l| l.dialog().status()) == DialogStatus::Connected));

    h.container.terminate_all();
    assert!(wait_until(|| h.container.is_empty()));
}

#[test]
fn test_parallel_call_limit_refuses_second_caller_branch() {
    let h = Harness::with_factory(Arc::new(LimitedFactory));

    let first = invite("first@bob", "sip:service@rsems", 1, "z9hG4bK-1");
    assert_eq!(h.container.dispatch_request(first), Dispatch::Created);

    let second = invite("second@bob", "sip:service@rsems", 1, "z9hG4bK-2").with_from("<sip:bob@example.com>", "bob-tag-2");
    assert_eq!(h.container.dispatch_request(second), Dispatch::Rejected { code: 402 });
    assert!(wait_until(|| h.sender.reply_codes().contains(&402)));
    assert_eq!(h.container.len(), 1);
}
