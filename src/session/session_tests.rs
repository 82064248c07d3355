// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tokio::sync::mpsc;

use super::*;

fn handle() -> (ClientHandle, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ClientHandle { id: rand::random(), tx }, rx)
}

#[tokio::test]
async fn attach_then_detach_leaves_buffer_and_state_unchanged() {
    let session = Session::new_for_test(1024);
    let (h, _rx) = handle();
    let id = h.id;
    session.attach(h).await;
    assert_eq!(session.client_count().await, 1);
    assert_eq!(session.state().await, ConnState::Connected);

    session.detach(id).await;
    assert_eq!(session.client_count().await, 0);
    assert_eq!(session.state().await, ConnState::Connected);
}

#[tokio::test]
async fn detaching_the_last_client_marks_the_session_backgrounded() {
    let session = Session::new_for_test(1024);
    let (h, _rx) = handle();
    let id = h.id;
    session.attach(h).await;
    assert!(!session.is_backgrounded());

    session.detach(id).await;
    assert!(session.is_backgrounded());

    let (h2, _rx2) = handle();
    session.attach(h2).await;
    assert!(!session.is_backgrounded());
}

#[tokio::test]
async fn attached_client_receives_broadcast_data_frame() {
    let session = Session::new_for_test(1024);
    let (h, mut rx) = handle();
    session.attach(h).await;

    session.handle_incoming(b"hello from the mud\r\n").await;

    let frame = rx.recv().await.expect("a data frame");
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["type"], "data");
    assert_eq!(value["seq"], 1);
}

#[tokio::test]
async fn failed_client_send_is_dropped_without_affecting_others() {
    let session = Session::new_for_test(1024);
    let (good, mut good_rx) = handle();
    let (bad, bad_rx) = handle();
    drop(bad_rx); // simulate a dead receiver
    session.attach(good).await;
    session.attach(bad).await;
    assert_eq!(session.client_count().await, 2);

    session.handle_incoming(b"ping\r\n").await;

    assert_eq!(session.client_count().await, 1);
    assert!(good_rx.recv().await.is_some());
}

#[tokio::test]
async fn gmcp_subnegotiation_broadcasts_gmcp_frame_not_data() {
    let session = Session::new_for_test(1024);
    let (h, mut rx) = handle();
    session.attach(h).await;

    let mut bytes = vec![crate::telnet::options::IAC, crate::telnet::options::SB, crate::telnet::options::OPT_GMCP];
    bytes.extend_from_slice(b"Char.Vitals {\"hp\":100}");
    bytes.extend_from_slice(&[crate::telnet::options::IAC, crate::telnet::options::SE]);
    session.handle_incoming(&bytes).await;

    let frame = rx.recv().await.expect("a gmcp frame");
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["type"], "gmcp");
    assert_eq!(value["package"], "Char.Vitals");
    assert_eq!(value["data"]["hp"], 100);
}

#[tokio::test]
async fn resume_replays_only_chunks_after_last_seq() {
    let session = Session::new_for_test(1024);
    for text in ["one\r\n", "two\r\n", "three\r\n", "four\r\n", "five\r\n"] {
        session.handle_incoming(text.as_bytes()).await;
    }
    let replayed = session.replay_from(2).await;
    let seqs: Vec<u64> = replayed.iter().map(|c| c.sequence).collect();
    assert_eq!(seqs, vec![3, 4, 5]);
}

#[tokio::test]
async fn close_terminates_all_clients_and_clears_buffer() {
    let session = Session::new_for_test(1024);
    let (h, mut rx) = handle();
    session.attach(h).await;
    session.handle_incoming(b"data before close\r\n").await;
    let _ = rx.recv().await; // drain the data frame

    session.close().await;

    let frame = rx.recv().await.expect("a disconnected frame");
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["type"], "disconnected");
    assert_eq!(session.client_count().await, 0);
    assert!(session.is_closing());
    assert_eq!(session.replay_from(0).await.len(), 0);
}

#[test]
fn constant_time_eq_matches_only_identical_strings() {
    assert!(constant_time_eq("abc123", "abc123"));
    assert!(!constant_time_eq("abc123", "abc124"));
    assert!(!constant_time_eq("short", "longer-string"));
}
