// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-message dispatch (spec §4.8): decodes one newline-JSON frame from
//! a transport, drives session/registry/scheduler operations, and writes
//! JSON replies back onto that transport's channel. Transport-agnostic: the
//! websocket binding in `transport` only owns the socket framing.

use std::sync::Arc;

use base64::Engine;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::buffer::ChunkKind;
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::notify::Notifier;
use crate::push::BackgroundPushScheduler;
use crate::session::manager::SessionManager;
use crate::session::{ClientHandle, Session, SessionEvent};
use crate::trigger::TriggerMatcher;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum InboundMessage {
    Connect {
        host: String,
        port: u16,
        device_token: Option<String>,
        width: Option<u16>,
        height: Option<u16>,
        #[allow(dead_code)]
        debug: Option<bool>,
    },
    Resume {
        session_id: Uuid,
        token: String,
        last_seq: u64,
        #[allow(dead_code)]
        device_token: Option<String>,
    },
    ActivityToken {
        token: String,
    },
    SyncAck {
        session_id: Uuid,
        last_seq: u64,
    },
    Input {
        text: String,
    },
    Naws {
        width: u16,
        height: u16,
    },
    Disconnect,
}

/// Ties the session registry, push scheduler, trigger matcher, and notifier
/// together behind one entry point per inbound client message.
pub struct Dispatcher<N: Notifier> {
    config: Arc<ProxyConfig>,
    manager: Arc<SessionManager>,
    scheduler: Arc<BackgroundPushScheduler<N>>,
    notifier: Arc<N>,
    triggers: Mutex<TriggerMatcher>,
}

impl<N: Notifier + 'static> Dispatcher<N> {
    pub fn new(config: Arc<ProxyConfig>, manager: Arc<SessionManager>, notifier: Arc<N>) -> Arc<Self> {
        let scheduler = BackgroundPushScheduler::new(Arc::clone(&config), Arc::clone(&notifier));
        let triggers = Mutex::new(TriggerMatcher::new(config.trigger_per_type_per_minute, config.trigger_total_per_hour));
        Arc::new(Self { config, manager, scheduler, notifier, triggers })
    }

    pub fn config(&self) -> &Arc<ProxyConfig> {
        &self.config
    }

    /// A transport dropped away without sending `disconnect`: detach it so
    /// the session stays alive (resumable) instead of being torn down.
    pub async fn forget_transport(&self, client_id: u64) {
        self.manager.detach_transport(client_id).await;
    }

    /// Decode and act on one line of client input. `client_id` identifies
    /// the transport; `reply_tx` is where replies for this transport go.
    pub async fn handle_client_message(self: &Arc<Self>, client_id: u64, ip: &str, reply_tx: &mpsc::UnboundedSender<String>, raw_line: &str) {
        let message: InboundMessage = match serde_json::from_str(raw_line) {
            Ok(message) => message,
            Err(err) => {
                let _ = reply_tx.send(error_frame(ProxyError::InvalidRequest, format!("malformed message: {err}")));
                return;
            }
        };

        match message {
            InboundMessage::Connect { host, port, device_token, width, height, debug: _ } => {
                self.handle_connect(client_id, ip, reply_tx, host, port, device_token, width, height).await;
            }
            InboundMessage::Resume { session_id, token, last_seq, device_token: _ } => {
                // resume's deviceToken field is accepted for schema parity with
                // connect but doesn't change push routing: a session's device
                // token is fixed at creation, matching connect's semantics.
                self.handle_resume(client_id, reply_tx, session_id, token, last_seq).await;
            }
            InboundMessage::ActivityToken { token } => {
                if let Some(session) = self.manager.find_by_transport(client_id).await {
                    session.set_activity_token(token).await;
                }
            }
            InboundMessage::SyncAck { session_id, last_seq } => {
                self.scheduler.record_sync_ack(session_id, last_seq).await;
            }
            InboundMessage::Input { text } => {
                if let Some(session) = self.manager.find_by_transport(client_id).await {
                    session.send_to_mud(&text).await;
                } else {
                    let _ = reply_tx.send(error_frame(ProxyError::InvalidRequest, "no session attached to this transport"));
                }
            }
            InboundMessage::Naws { width, height } => {
                if let Some(session) = self.manager.find_by_transport(client_id).await {
                    session.update_window_size(width, height).await;
                }
            }
            InboundMessage::Disconnect => {
                if let Some(session) = self.manager.find_by_transport(client_id).await {
                    self.manager.remove_session(session.id).await;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_connect(
        self: &Arc<Self>,
        client_id: u64,
        ip: &str,
        reply_tx: &mpsc::UnboundedSender<String>,
        host: String,
        port: u16,
        device_token: Option<String>,
        width: Option<u16>,
        height: Option<u16>,
    ) {
        if !self.config.allows_target(&host, port) {
            let _ = reply_tx.send(error_frame(ProxyError::InvalidRequest, "target host/port not permitted"));
            return;
        }

        let admission = self.manager.enforce_connection_limits(device_token.as_deref(), ip).await;
        if !admission.allowed {
            let _ = reply_tx.send(error_frame(ProxyError::RateLimited, admission.reason.unwrap_or_default()));
            return;
        }

        let (session, events) = self.manager.create(host, port, device_token, ip).await;

        if let (Some(width), Some(height)) = (width, height) {
            session.update_window_size(width, height).await;
        }

        self.manager.attach_transport(&session, client_id, ClientHandle { id: client_id, tx: reply_tx.clone() }).await;
        self.spawn_event_pump(Arc::clone(&session), events);

        let _ = reply_tx.send(session_frame(&session));
    }

    async fn handle_resume(self: &Arc<Self>, client_id: u64, reply_tx: &mpsc::UnboundedSender<String>, session_id: Uuid, token: String, last_seq: u64) {
        let Some(session) = self.manager.get(session_id).await else {
            let _ = reply_tx.send(error_frame(ProxyError::InvalidResume, "unknown session"));
            return;
        };

        if !SessionManager::validate_token(&session, &token) {
            let _ = reply_tx.send(error_frame(ProxyError::InvalidResume, "token mismatch"));
            return;
        }

        let idle_ms = crate::buffer::epoch_ms().saturating_sub(session.last_client_attach_at_ms());
        if idle_ms > self.config.timeout().as_millis() as u64 {
            let _ = reply_tx.send(error_frame(ProxyError::SessionExpired, "session exceeded the idle timeout"));
            return;
        }

        self.scheduler.untrack(session.id).await;
        self.manager.attach_transport(&session, client_id, ClientHandle { id: client_id, tx: reply_tx.clone() }).await;
        session.mark_backgrounded(false);

        for chunk in session.replay_from(last_seq).await {
            let _ = reply_tx.send(replay_frame(&chunk));
        }
    }

    /// Drain one session's event stream, feeding trigger matching and push
    /// scheduling while it has no attached clients (spec §4.8's final
    /// paragraph). Exits once the channel closes (session torn down).
    fn spawn_event_pump(self: &Arc<Self>, session: Arc<Session>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SessionEvent::TextChunk { seq, text, had_attached_clients } => {
                        if had_attached_clients {
                            dispatcher.scheduler.untrack(session.id).await;
                            continue;
                        }
                        let snippet = String::from_utf8_lossy(&text).into_owned();
                        dispatcher.scheduler.track(&session, session.mud_host.clone()).await;
                        dispatcher.scheduler.on_buffered_output(&session, seq, &snippet).await;

                        let matched = dispatcher.triggers.lock().await.try_match(&snippet, session.id);
                        if let Some(trigger_match) = matched {
                            if let Some(device_token) = session.device_token.clone() {
                                dispatcher.notifier.send_notification(&device_token, &trigger_match, &session.id.to_string()).await;
                            }
                        }
                    }
                    SessionEvent::Gmcp { .. } => {}
                    SessionEvent::ConnectionFailed | SessionEvent::Closed => {
                        // Covers both a connect failure (no session.close()
                        // has run yet) and a mid-session close: tell
                        // whoever is attached, then reap (spec §4.3:
                        // "dispatcher reaps the session"). `remove_session`
                        // is idempotent if something else already removed
                        // it (e.g. an explicit `disconnect`).
                        session.broadcast(&error_frame(ProxyError::ConnectionFailed, "telnet connection closed")).await;
                        dispatcher.manager.remove_session(session.id).await;
                        break;
                    }
                }
            }
        });
    }

    /// Periodic purge of per-session trigger rate-limit bookkeeping (spec
    /// §9's "add a periodic sweep" guidance for wall-clock rate-limit maps).
    pub fn spawn_trigger_cleanup_task(self: &Arc<Self>) {
        let dispatcher = Arc::clone(self);
        let max_age = dispatcher.config.trigger_cleanup_max_age();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(std::time::Duration::from_secs(3600));
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                timer.tick().await;
                dispatcher.triggers.lock().await.cleanup_old_entries(max_age);
            }
        });
    }
}

fn session_frame(session: &Session) -> String {
    serde_json::json!({
        "type": "session",
        "sessionId": session.id,
        "token": session.token,
        "capabilities": ["activityToken", "syncAck"],
    })
    .to_string()
}

fn replay_frame(chunk: &crate::buffer::Chunk) -> String {
    match chunk.kind {
        ChunkKind::Data => serde_json::json!({
            "type": "data",
            "seq": chunk.sequence,
            "payload": base64::engine::general_purpose::STANDARD.encode(&chunk.payload),
        })
        .to_string(),
        ChunkKind::Gmcp => {
            let data_value: serde_json::Value = match &chunk.gmcp_data {
                Some(raw) if !raw.is_empty() => serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({ "raw": raw })),
                _ => serde_json::Value::Null,
            };
            serde_json::json!({
                "type": "gmcp",
                "seq": chunk.sequence,
                "package": chunk.gmcp_package.clone().unwrap_or_default(),
                "data": data_value,
            })
            .to_string()
        }
    }
}

fn error_frame(code: ProxyError, message: impl Into<String>) -> String {
    let body = code.to_error_body(message);
    serde_json::json!({ "type": "error", "code": body.code, "message": body.message }).to_string()
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
