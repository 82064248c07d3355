// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A single proxied MUD session: one telnet connection, its replay buffer,
//! and zero or more attached client transports (spec §4.3).

pub mod conn;
pub mod manager;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::buffer::{ChunkKind, CircularBuffer};
use crate::telnet::negotiate::Encoding;
use crate::telnet::{Negotiator, TelnetParser};

use conn::{connect_with_fallback, TelnetConn};

const READ_CHUNK_SIZE: usize = 8192;

/// Session connection lifecycle (spec §4.3). Reverse edges only via
/// `close()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Connected,
    Closed,
}

/// One attached client transport: an outbound channel of newline-JSON
/// frames plus an id used to detach it again.
pub struct ClientHandle {
    pub id: u64,
    pub tx: mpsc::UnboundedSender<String>,
}

/// An event the read loop emits for the dispatcher to act on: trigger
/// matching and push scheduling both live outside `Session` (spec §4.8
/// routes them through the dispatcher, not the session itself), so the
/// session just reports what happened.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    TextChunk { seq: u64, text: Vec<u8>, had_attached_clients: bool },
    Gmcp { seq: u64, package: String, data: Option<String> },
    ConnectionFailed,
    Closed,
}

/// A proxied MUD session: owns the telnet connection, the replay buffer,
/// and the set of attached client transports.
pub struct Session {
    pub id: Uuid,
    pub token: String,
    pub mud_host: String,
    pub mud_port: u16,
    pub device_token: Option<String>,
    pub activity_token: Mutex<Option<String>>,
    pub created_at_ms: u64,

    state: Mutex<ConnState>,
    conn_write: Mutex<Option<TelnetConn>>,
    clients: RwLock<Vec<ClientHandle>>,
    buffer: Mutex<CircularBuffer>,
    parser: Mutex<TelnetParser>,
    negotiator: Mutex<Negotiator>,
    closing: AtomicBool,
    last_client_attach_at_ms: AtomicU64,
    client_backgrounded: AtomicBool,
    last_backgrounded_at_ms: AtomicU64,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
}

impl Session {
    /// Construct a session and spawn its telnet connect + read loop. The
    /// returned `Receiver` streams [`SessionEvent`]s for the dispatcher to
    /// drive trigger matching and push scheduling from.
    pub fn spawn(
        mud_host: String,
        mud_port: u16,
        device_token: Option<String>,
        buffer_capacity_bytes: usize,
        parent_cancel: &CancellationToken,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            token: random_token(),
            mud_host,
            mud_port,
            device_token,
            activity_token: Mutex::new(None),
            created_at_ms: crate::buffer::epoch_ms(),
            state: Mutex::new(ConnState::Connecting),
            conn_write: Mutex::new(None),
            clients: RwLock::new(Vec::new()),
            buffer: Mutex::new(CircularBuffer::new(buffer_capacity_bytes)),
            parser: Mutex::new(TelnetParser::new()),
            negotiator: Mutex::new(Negotiator::new("tnbridge", env!("CARGO_PKG_VERSION"))),
            closing: AtomicBool::new(false),
            last_client_attach_at_ms: AtomicU64::new(crate::buffer::epoch_ms()),
            client_backgrounded: AtomicBool::new(false),
            last_backgrounded_at_ms: AtomicU64::new(0),
            events_tx,
            cancel: parent_cancel.child_token(),
        });

        tokio::spawn(Arc::clone(&session).connect_and_run());
        (session, events_rx)
    }

    async fn connect_and_run(self: Arc<Self>) {
        let connect = connect_with_fallback(&self.mud_host, self.mud_port);
        let conn = tokio::select! {
            _ = self.cancel.cancelled() => {
                // Closed while connecting: reject the pending attempt (spec §4.3).
                *self.state.lock().await = ConnState::Closed;
                let _ = self.events_tx.send(SessionEvent::Closed);
                return;
            }
            result = connect => result,
        };

        let conn = match conn {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!(session_id = %self.id, %err, "telnet connect failed");
                *self.state.lock().await = ConnState::Closed;
                let _ = self.events_tx.send(SessionEvent::ConnectionFailed);
                return;
            }
        };

        if self.closing.load(Ordering::SeqCst) {
            // Raced with close() between the select above and here.
            return;
        }

        *self.conn_write.lock().await = Some(conn);
        *self.state.lock().await = ConnState::Connected;

        self.read_loop().await;
    }

    async fn read_loop(self: Arc<Self>) {
        let mut read_buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            let n = {
                let mut guard = self.conn_write.lock().await;
                let Some(conn) = guard.as_mut() else { break };
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    result = conn.read(&mut read_buf) => result,
                }
            };

            match n {
                Ok(0) => {
                    tracing::debug!(session_id = %self.id, "telnet connection closed by peer");
                    break;
                }
                Ok(n) => {
                    self.handle_incoming(&read_buf[..n]).await;
                }
                Err(err) => {
                    tracing::warn!(session_id = %self.id, %err, "telnet read error");
                    break;
                }
            }
        }

        // Notifying attached clients and tearing the session down both
        // happen in the dispatcher's event pump (spec §4.3: "dispatcher
        // reaps the session"), not here, so a pure connect failure (which
        // never reaches this loop) gets the same treatment as a mid-session
        // close instead of leaving the session registered until TTL.
        let _ = self.events_tx.send(SessionEvent::ConnectionFailed);
    }

    pub(crate) async fn handle_incoming(&self, bytes: &[u8]) {
        let output = self.parser.lock().await.process(bytes);

        let (negotiations, subnegs) = {
            let mut parser = self.parser.lock().await;
            (parser.take_negotiations(), parser.take_subnegs())
        };

        if !negotiations.is_empty() || !subnegs.is_empty() {
            let mut negotiator = self.negotiator.lock().await;
            let mut reply = Vec::new();
            for n in negotiations {
                reply.extend(negotiator.handle_negotiation(n));
            }
            for s in subnegs {
                reply.extend(negotiator.handle_subneg(s));
            }
            drop(negotiator);
            if !reply.is_empty() {
                self.write_raw(&reply).await;
            }
        }

        let had_clients = !self.clients.read().await.is_empty();

        if !output.text.is_empty() {
            // ECHO WILL puts the negotiator in password mode (spec §4.2's
            // table: "suppress logging"); the chunk still buffers and
            // broadcasts normally, it just never hits the trace log.
            if self.negotiator.lock().await.password_mode() {
                tracing::trace!(session_id = %self.id, bytes = output.text.len(), "mud output chunk (password mode)");
            } else {
                tracing::trace!(session_id = %self.id, text = %String::from_utf8_lossy(&output.text), "mud output chunk");
            }

            let chunk = self.buffer.lock().await.append(output.text.clone(), ChunkKind::Data, None);
            self.broadcast_data(chunk.sequence, &output.text).await;
            let _ = self
                .events_tx
                .send(SessionEvent::TextChunk { seq: chunk.sequence, text: output.text, had_attached_clients: had_clients });
        }

        for gmcp in output.gmcp_messages {
            let chunk = self.buffer.lock().await.append(
                Vec::new(),
                ChunkKind::Gmcp,
                Some((gmcp.package.clone(), gmcp.data.clone().unwrap_or_default())),
            );
            self.broadcast_gmcp(chunk.sequence, &gmcp.package, gmcp.data.as_deref()).await;
            let _ = self.events_tx.send(SessionEvent::Gmcp { seq: chunk.sequence, package: gmcp.package, data: gmcp.data });
        }
    }

    async fn broadcast_data(&self, seq: u64, payload: &[u8]) {
        use base64::Engine;
        let body = serde_json::json!({
            "type": "data",
            "seq": seq,
            "payload": base64::engine::general_purpose::STANDARD.encode(payload),
        });
        self.broadcast(&body.to_string()).await;
    }

    async fn broadcast_gmcp(&self, seq: u64, package: &str, data: Option<&str>) {
        let data_value: serde_json::Value = match data {
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({ "raw": raw })),
            None => serde_json::Value::Null,
        };
        let body = serde_json::json!({ "type": "gmcp", "seq": seq, "package": package, "data": data_value });
        self.broadcast(&body.to_string()).await;
    }

    /// Send one frame to every attached client, dropping any that fail
    /// (spec §9: collect failed clients during iteration, detach after).
    /// `pub(crate)` so the dispatcher can push the `connection_failed`
    /// frame on [`SessionEvent::ConnectionFailed`] without duplicating the
    /// failed-client bookkeeping.
    pub(crate) async fn broadcast(&self, frame: &str) {
        let mut failed = Vec::new();
        {
            let clients = self.clients.read().await;
            for client in clients.iter() {
                if client.tx.send(frame.to_owned()).is_err() {
                    failed.push(client.id);
                }
            }
        }
        if !failed.is_empty() {
            let mut clients = self.clients.write().await;
            clients.retain(|c| !failed.contains(&c.id));
        }
    }

    /// Attach a client transport. Never touches the telnet connection.
    pub async fn attach(&self, handle: ClientHandle) {
        self.clients.write().await.push(handle);
        self.last_client_attach_at_ms.store(crate::buffer::epoch_ms(), Ordering::Relaxed);
        if self.client_backgrounded.swap(false, Ordering::Relaxed) {
            let backgrounded_ms = crate::buffer::epoch_ms().saturating_sub(self.last_backgrounded_at_ms());
            tracing::debug!(session_id = %self.id, backgrounded_ms, "client reattached after backgrounding");
        }
    }

    /// Detach a client transport by id. Telnet connection is unaffected.
    /// Marks the session backgrounded once its last client is gone.
    pub async fn detach(&self, client_id: u64) {
        let mut clients = self.clients.write().await;
        clients.retain(|c| c.id != client_id);
        if clients.is_empty() {
            self.client_backgrounded.store(true, Ordering::Relaxed);
            self.last_backgrounded_at_ms.store(crate::buffer::epoch_ms(), Ordering::Relaxed);
        }
    }

    pub async fn has_attached_clients(&self) -> bool {
        !self.clients.read().await.is_empty()
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub fn last_client_attach_at_ms(&self) -> u64 {
        self.last_client_attach_at_ms.load(Ordering::Relaxed)
    }

    pub async fn state(&self) -> ConnState {
        *self.state.lock().await
    }

    pub fn mark_backgrounded(&self, backgrounded: bool) {
        self.client_backgrounded.store(backgrounded, Ordering::Relaxed);
    }

    pub fn is_backgrounded(&self) -> bool {
        self.client_backgrounded.load(Ordering::Relaxed)
    }

    pub fn last_backgrounded_at_ms(&self) -> u64 {
        self.last_backgrounded_at_ms.load(Ordering::Relaxed)
    }

    pub async fn set_activity_token(&self, token: String) {
        *self.activity_token.lock().await = Some(token);
    }

    /// Replay every retained chunk after `seq`, in order.
    pub async fn replay_from(&self, seq: u64) -> Vec<crate::buffer::Chunk> {
        self.buffer.lock().await.replay_from(seq)
    }

    pub async fn last_sequence(&self) -> u64 {
        self.buffer.lock().await.get_last_sequence()
    }

    /// Encode and write client-origin text to the MUD, per the session's
    /// negotiated outbound encoding (Latin-1 until CHARSET is accepted).
    pub async fn send_to_mud(&self, text: &str) {
        let encoding = self.negotiator.lock().await.encoding();
        let bytes = match encoding {
            Encoding::Utf8 => text.as_bytes().to_vec(),
            Encoding::Latin1 => text.chars().map(|c| if (c as u32) < 256 { c as u8 } else { b'?' }).collect(),
        };
        self.write_raw(&bytes).await;
    }

    /// Update the client's reported window size and immediately inform the
    /// MUD via a NAWS subnegotiation (spec §4.8's `naws` client message).
    pub async fn update_window_size(&self, width: u16, height: u16) {
        let bytes = {
            let mut negotiator = self.negotiator.lock().await;
            negotiator.set_window_size(width, height);
            negotiator.naws_update_bytes()
        };
        self.write_raw(&bytes).await;
    }

    async fn write_raw(&self, bytes: &[u8]) {
        let mut guard = self.conn_write.lock().await;
        if let Some(conn) = guard.as_mut() {
            if let Err(err) = conn.write_all(bytes).await {
                tracing::warn!(session_id = %self.id, %err, "telnet write failed");
            }
        }
    }

    /// Terminate all attached clients, destroy the telnet socket, clear the
    /// buffer, and mark the session closing (spec §4.3).
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        *self.state.lock().await = ConnState::Closed;

        let clients: Vec<ClientHandle> = std::mem::take(&mut *self.clients.write().await);
        for client in clients {
            let _ = client.tx.send(serde_json::json!({ "type": "disconnected", "sessionId": self.id }).to_string());
        }

        *self.conn_write.lock().await = None;
        self.buffer.lock().await.clear();
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Backdate the last-attach timestamp, for exercising TTL reaping
    /// without sleeping in tests.
    #[cfg(test)]
    pub(crate) fn set_last_client_attach_at_ms_for_test(&self, ms: u64) {
        self.last_client_attach_at_ms.store(ms, Ordering::Relaxed);
    }

    /// Construct a session with no live telnet connection, for exercising
    /// buffering/attach/broadcast logic without a real socket.
    #[cfg(test)]
    pub(crate) fn new_for_test(buffer_capacity_bytes: usize) -> Arc<Self> {
        Self::new_for_test_with_device(buffer_capacity_bytes, None)
    }

    #[cfg(test)]
    pub(crate) fn new_for_test_with_device(buffer_capacity_bytes: usize, device_token: Option<String>) -> Arc<Self> {
        Self::new_for_test_with_events(buffer_capacity_bytes, device_token).0
    }

    /// Like [`new_for_test_with_device`](Self::new_for_test_with_device) but
    /// also returns the event receiver, for exercising dispatcher logic that
    /// reacts to [`SessionEvent`] (e.g. reaping on `ConnectionFailed`)
    /// without a real telnet socket.
    #[cfg(test)]
    pub(crate) fn new_for_test_with_events(
        buffer_capacity_bytes: usize,
        device_token: Option<String>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            token: random_token(),
            mud_host: "localhost".to_owned(),
            mud_port: 4000,
            device_token,
            activity_token: Mutex::new(None),
            created_at_ms: crate::buffer::epoch_ms(),
            state: Mutex::new(ConnState::Connected),
            conn_write: Mutex::new(None),
            clients: RwLock::new(Vec::new()),
            buffer: Mutex::new(CircularBuffer::new(buffer_capacity_bytes)),
            parser: Mutex::new(TelnetParser::new()),
            negotiator: Mutex::new(Negotiator::new("tnbridge", "test")),
            closing: AtomicBool::new(false),
            last_client_attach_at_ms: AtomicU64::new(crate::buffer::epoch_ms()),
            client_backgrounded: AtomicBool::new(false),
            last_backgrounded_at_ms: AtomicU64::new(0),
            events_tx,
            cancel: CancellationToken::new(),
        });
        (session, events_rx)
    }
}

fn random_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Constant-time token comparison (spec §4.4), grounded on the reference
/// repo's bearer-token `constant_time_eq`.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
