// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio::sync::Mutex as TokioMutex;

use super::*;
use crate::session::Session;
use crate::trigger::TriggerMatch;

#[derive(Default)]
struct CountingNotifier {
    silent_calls: TokioMutex<u32>,
    activity_calls: TokioMutex<u32>,
}

impl Notifier for CountingNotifier {
    async fn send_silent_push(&self, _device_token: &str, _session_id: &str) -> bool {
        *self.silent_calls.lock().await += 1;
        true
    }

    async fn send_activity_kit_push(&self, _activity_token: &str, _content_state: &serde_json::Value) -> bool {
        *self.activity_calls.lock().await += 1;
        true
    }

    async fn send_notification(&self, _device_token: &str, _trigger_match: &TriggerMatch, _session_id: &str) -> bool {
        true
    }
}

fn test_config() -> Arc<ProxyConfig> {
    Arc::new(ProxyConfig {
        host: "0.0.0.0".to_owned(),
        port: 6200,
        tn_host: None,
        tn_port: None,
        only_allow_default_server: false,
        allowed_origins: "*".to_owned(),
        trust_proxy: false,
        timeout_hours: 24,
        max_per_device: 5,
        max_per_ip: 10,
        buffer_size_kb: 50,
        trigger_per_type_per_minute: 1,
        trigger_total_per_hour: 10,
        silent_push_interval_ms: 20 * 60 * 1000,
        activity_push_interval_ms: 2 * 60 * 1000,
        activity_ack_timeout_ms: 15_000,
        fallback_cooldown_ms: 60_000,
        max_fallbacks_per_hour: 6,
        max_snippet_length: 100,
        cleanup_interval_secs: 300,
        trigger_cleanup_max_age_hours: 48,
    })
}

async fn session_with_tokens() -> Arc<Session> {
    let session = Session::new_for_test_with_device(1024, Some("device-tok".to_owned()));
    session.set_activity_token("activity-tok".to_owned()).await;
    session
}

#[tokio::test]
async fn track_then_untrack_makes_on_buffered_output_a_no_op() {
    let scheduler = BackgroundPushScheduler::new(test_config(), Arc::new(CountingNotifier::default()));
    let session = session_with_tokens().await;
    session.handle_incoming(b"some output\r\n").await;

    scheduler.track(&session, "TestWorld").await;
    scheduler.untrack(session.id).await;
    scheduler.on_buffered_output(&session, session.last_sequence().await, "some output").await;

    assert_eq!(*scheduler.notifier.silent_calls.lock().await, 0);
    assert_eq!(*scheduler.notifier.activity_calls.lock().await, 0);
}

#[tokio::test]
async fn untracked_session_on_buffered_output_is_a_no_op() {
    let scheduler = BackgroundPushScheduler::new(test_config(), Arc::new(CountingNotifier::default()));
    let session = session_with_tokens().await;
    scheduler.on_buffered_output(&session, 5, "hi").await;
    assert_eq!(*scheduler.notifier.silent_calls.lock().await, 0);
}

#[tokio::test]
async fn coalesces_two_calls_into_one_silent_and_one_activity_push() {
    let scheduler = BackgroundPushScheduler::new(test_config(), Arc::new(CountingNotifier::default()));
    let session = session_with_tokens().await;
    scheduler.track(&session, "TestWorld").await;

    session.handle_incoming(b"first line\r\n").await;
    scheduler.on_buffered_output(&session, session.last_sequence().await, "first line").await;

    session.handle_incoming(b"second line\r\n").await;
    scheduler.on_buffered_output(&session, session.last_sequence().await, "second line").await;

    assert_eq!(*scheduler.notifier.silent_calls.lock().await, 1);
    assert_eq!(*scheduler.notifier.activity_calls.lock().await, 1);
}

#[tokio::test]
async fn record_sync_ack_is_idempotent() {
    let scheduler = BackgroundPushScheduler::new(test_config(), Arc::new(CountingNotifier::default()));
    let session = session_with_tokens().await;
    scheduler.track(&session, "TestWorld").await;

    scheduler.record_sync_ack(session.id, 10).await;
    let entry = scheduler.tracked.lock().await.get(&session.id).cloned().unwrap();
    let first = entry.lock().await.last_ack_sequence;

    scheduler.record_sync_ack(session.id, 10).await;
    let second = entry.lock().await.last_ack_sequence;

    assert_eq!(first, second);
    assert_eq!(first, 10);
}

#[test]
fn normalize_snippet_collapses_whitespace_and_truncates() {
    let raw = "  hello    world  \n  this is   a test  ";
    assert_eq!(normalize_snippet(raw, 100), "hello world this is a test");
    assert_eq!(normalize_snippet(raw, 5), "hello");
}
