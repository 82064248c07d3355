// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::session::Session;

fn test_manager(max_per_device: usize, max_per_ip: usize) -> Arc<SessionManager> {
    let config = Arc::new(crate::config::ProxyConfig {
        host: "0.0.0.0".to_owned(),
        port: 6200,
        tn_host: None,
        tn_port: None,
        only_allow_default_server: false,
        allowed_origins: "*".to_owned(),
        trust_proxy: false,
        timeout_hours: 24,
        max_per_device,
        max_per_ip,
        buffer_size_kb: 50,
        trigger_per_type_per_minute: 1,
        trigger_total_per_hour: 10,
        silent_push_interval_ms: 1_200_000,
        activity_push_interval_ms: 120_000,
        activity_ack_timeout_ms: 15_000,
        fallback_cooldown_ms: 60_000,
        max_fallbacks_per_hour: 6,
        max_snippet_length: 100,
        cleanup_interval_secs: 300,
        trigger_cleanup_max_age_hours: 48,
    });
    SessionManager::new(config, CancellationToken::new())
}

#[tokio::test]
async fn ip_cap_denies_the_nth_plus_one_connect() {
    let manager = test_manager(5, 2);
    assert!(manager.enforce_connection_limits(None, "1.2.3.4").await.allowed);
    assert!(manager.enforce_connection_limits(None, "1.2.3.4").await.allowed);
    let third = manager.enforce_connection_limits(None, "1.2.3.4").await;
    assert!(!third.allowed);
    assert_eq!(third.reason.as_deref(), Some("Connection limit exceeded for this IP address"));
}

#[tokio::test]
async fn device_cap_evicts_oldest_session_fifo() {
    let manager = test_manager(2, 100);
    let device = "device-abc".to_owned();

    let s1 = Session::new_for_test_with_device(1024, Some(device.clone()));
    let s2 = Session::new_for_test_with_device(1024, Some(device.clone()));
    manager.insert_for_test(Arc::clone(&s1)).await;
    manager.insert_for_test(Arc::clone(&s2)).await;

    // Third connect for the same device: at cap, must evict s1 (oldest).
    manager.enforce_connection_limits(Some(&device), "9.9.9.9").await;

    assert!(manager.get(s1.id).await.is_none());
    assert!(manager.get(s2.id).await.is_some());
}

#[tokio::test]
async fn attach_transport_detaches_from_previous_session_first() {
    let manager = test_manager(5, 5);
    let s1 = Session::new_for_test(1024);
    let s2 = Session::new_for_test(1024);
    manager.insert_for_test(Arc::clone(&s1)).await;
    manager.insert_for_test(Arc::clone(&s2)).await;

    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let client_id = 42u64;
    manager.attach_transport(&s1, client_id, crate::session::ClientHandle { id: client_id, tx: tx.clone() }).await;
    assert_eq!(s1.client_count().await, 1);

    let (tx2, _rx2) = tokio::sync::mpsc::unbounded_channel();
    manager.attach_transport(&s2, client_id, crate::session::ClientHandle { id: client_id, tx: tx2 }).await;
    assert_eq!(s1.client_count().await, 0);
    assert_eq!(s2.client_count().await, 1);

    let found = manager.find_by_transport(client_id).await.expect("attached session");
    assert_eq!(found.id, s2.id);
}

#[tokio::test]
async fn cleanup_inactive_reaps_sessions_past_ttl() {
    let manager = test_manager(5, 5);
    let stale = Session::new_for_test(1024);
    let fresh = Session::new_for_test(1024);
    stale.set_last_client_attach_at_ms_for_test(0);
    manager.insert_for_test(Arc::clone(&stale)).await;
    manager.insert_for_test(Arc::clone(&fresh)).await;

    manager.cleanup_inactive_for_test(Duration::from_secs(1)).await;

    assert!(manager.get(stale.id).await.is_none());
    assert!(manager.get(fresh.id).await.is_some());
}

#[test]
fn validate_token_uses_constant_time_comparison() {
    let session = Session::new_for_test(1024);
    assert!(SessionManager::validate_token(&session, &session.token));
    assert!(!SessionManager::validate_token(&session, "not-the-token"));
}
