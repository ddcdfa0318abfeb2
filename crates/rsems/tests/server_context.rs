//! Startup, status and shutdown of the whole server

mod common;

use std::sync::Arc;

use common::{wait_until, AnsweringFactory, Caller, RecordingSender, SilentFactory};
use rsems::config::ServerConfig;
use rsems::prelude::*;
use serial_test::serial;

fn small_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.threads.session_processor_threads = 2;
    config.threads.media_processor_threads = 2;
    config.transactions.bucket_count = 256;
    config
}

#[test]
#[serial]
fn test_start_reports_status_and_shuts_down_once() {
    let sender = Arc::new(RecordingSender::default());
    let server = ServerContext::start(small_config(), sender, Arc::new(AnsweringFactory)).unwrap();
    assert!(server.is_running());

    let status = server.status_json();
    assert_eq!(status["running"], true);
    assert_eq!(status["workers"]["count"], 2);
    assert_eq!(status["media"]["threads"], 2);
    assert_eq!(status["sessions"], 0);
    assert_eq!(status["transactions"], 0);

    server.shutdown();
    assert!(!server.is_running());
    server.shutdown();
    assert_eq!(server.status_json()["running"], false);
}

#[test]
#[serial]
fn test_invalid_config_is_refused() {
    let mut config = small_config();
    config.threads.media_processor_threads = 0;
    let sender = Arc::new(RecordingSender::default());
    assert!(ServerContext::start(config, sender, Arc::new(AnsweringFactory)).is_err());
}

#[test]
#[serial]
fn test_incoming_call_is_tracked_by_watcher() {
    let sender = Arc::new(RecordingSender::default());
    let server = ServerContext::start(small_config(), sender.clone(), Arc::new(AnsweringFactory)).unwrap();

    let invite = SipRequest::new(Method::Invite, "sip:service@rsems", "watched@bob", 1)
        .with_from("<sip:bob@example.com>", "bob-tag")
        .with_to("<sip:service@rsems>", "")
        .with_branch("z9hG4bK-w");
    assert_eq!(server.sessions().dispatch_request(invite), Dispatch::Created);
    assert!(wait_until(|| sender.reply_codes() == vec![200]));
    assert!(wait_until(|| {
        server
            .watcher()
            .get_status("watched@bob")
            .is_some_and(|s| s.status == DialogStatus::Connected)
    }));
    assert_eq!(server.status_json()["sessions"], 1);

    server.shutdown();
    assert!(!server.is_running());
}

#[test]
#[serial]
fn test_unanswered_invite_times_out() {
    let mut config = small_config();
    config.transactions.t1_ms = 5;
    let sender = Arc::new(RecordingSender::default());
    let server = ServerContext::start(config, sender.clone(), Arc::new(AnsweringFactory)).unwrap();

    let mut dialog = server.sessions().new_dialog();
    dialog.set_call_id("unanswered@rsems");
    dialog.set_local_tag("rsems-tag");
    dialog.set_local_party("<sip:service@rsems>");
    dialog.set_remote_party("<sip:dave@example.com>");
    dialog.set_remote_uri("sip:dave@example.com");
    dialog.set_local_uri("<sip:service@10.0.0.1>");
    server.sessions().add_leg(dialog, Box::new(Caller)).unwrap();

    assert!(wait_until(|| sender.sent_methods() == vec![Method::Invite]));
    // 64 * T1 = 320 ms, then the leg is disposable
    assert!(wait_until(|| server.sessions().is_empty()));
    assert_eq!(server.transactions().len(), 0);
}

#[test]
#[serial]
fn test_shutdown_terminates_every_pending_call() {
    let sender = Arc::new(RecordingSender::default());
    let server = ServerContext::start(small_config(), sender.clone(), Arc::new(SilentFactory)).unwrap();

    let calls = 500;
    for i in 0..calls {
        let invite = SipRequest::new(Method::Invite, "sip:service@rsems", format!("pending-{}@bob", i), 1)
            .with_from("<sip:bob@example.com>", "bob-tag")
            .with_to("<sip:service@rsems>", "")
            .with_branch(format!("z9hG4bK-p{}", i));
        assert_eq!(server.sessions().dispatch_request(invite), Dispatch::Created);
    }

    server.shutdown();

    assert!(server.sessions().is_empty());
    let terminated = sender.reply_codes().iter().filter(|c| **c == 481).count();
    assert_eq!(terminated, calls);
    assert_eq!(server.watcher().counts().0, 0);
}
