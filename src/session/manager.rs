// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session registry: lookup by id/transport/device, admission control, and
//! TTL reaping (spec §4.4). Grounded on the reference repo's `MuxState`
//! sessions map plus `upstream::health::spawn_health_checker`'s
//! snapshot-then-evict sweep shape, reused here for `cleanup_inactive`.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{constant_time_eq, Session, SessionEvent};
use crate::config::ProxyConfig;

/// Outcome of [`SessionManager::enforce_connection_limits`].
#[derive(Debug, Clone)]
pub struct Admission {
    pub allowed: bool,
    pub reason: Option<String>,
}

/// Registry of live sessions plus the reverse indexes admission control and
/// resume need. A single `RwLock` guards all the maps together (spec §5:
/// "a single mutex around these maps is sufficient").
pub struct SessionManager {
    config: Arc<ProxyConfig>,
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    transports: RwLock<HashMap<u64, Uuid>>,
    /// Per-device sessions in creation order, so device-cap eviction is a
    /// pure front-pop (spec P9: FIFO on `createdAt`).
    by_device: RwLock<IndexMap<String, IndexSet<Uuid>>>,
    by_ip: RwLock<HashMap<String, usize>>,
    /// IP each live session was admitted from, so its slot can be released
    /// on removal without the caller having to remember it.
    ip_by_session: RwLock<HashMap<Uuid, String>>,
    cancel: CancellationToken,
}

impl SessionManager {
    pub fn new(config: Arc<ProxyConfig>, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            transports: RwLock::new(HashMap::new()),
            by_device: RwLock::new(IndexMap::new()),
            by_ip: RwLock::new(HashMap::new()),
            ip_by_session: RwLock::new(HashMap::new()),
            cancel,
        })
    }

    /// Create and register a new session, spawning its telnet connect and
    /// read loop. `ip` is the admitting client IP, recorded so its
    /// admission slot is released automatically when the session is later
    /// removed.
    pub async fn create(
        &self,
        host: String,
        port: u16,
        device_token: Option<String>,
        ip: &str,
    ) -> (Arc<Session>, tokio::sync::mpsc::UnboundedReceiver<SessionEvent>) {
        let (session, events) =
            Session::spawn(host, port, device_token.clone(), self.config.buffer_capacity_bytes(), &self.cancel);

        self.sessions.write().await.insert(session.id, Arc::clone(&session));
        if let Some(token) = device_token {
            self.by_device.write().await.entry(token).or_default().insert(session.id);
        }
        self.ip_by_session.write().await.insert(session.id, ip.to_owned());

        (session, events)
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn find_by_transport(&self, client_id: u64) -> Option<Arc<Session>> {
        let session_id = *self.transports.read().await.get(&client_id)?;
        self.get(session_id).await
    }

    pub async fn sessions_by_device(&self, device_token: &str) -> Vec<Arc<Session>> {
        let Some(ids) = self.by_device.read().await.get(device_token).cloned() else {
            return Vec::new();
        };
        let sessions = self.sessions.read().await;
        ids.iter().filter_map(|id| sessions.get(id).cloned()).collect()
    }

    /// Constant-time comparison of the presented token against the
    /// session's actual token (spec §4.4).
    pub fn validate_token(session: &Session, token: &str) -> bool {
        constant_time_eq(&session.token, token)
    }

    /// Attach a client transport to a session, detaching it from any
    /// session it was previously attached to first.
    pub async fn attach_transport(&self, session: &Arc<Session>, client_id: u64, handle: super::ClientHandle) {
        self.detach_transport(client_id).await;
        session.attach(handle).await;
        self.transports.write().await.insert(client_id, session.id);
    }

    pub async fn detach_transport(&self, client_id: u64) {
        let Some(session_id) = self.transports.write().await.remove(&client_id) else {
            return;
        };
        if let Some(session) = self.get(session_id).await {
            session.detach(client_id).await;
        }
    }

    /// Close and fully unregister a session.
    pub async fn remove_session(&self, id: Uuid) {
        let session = self.sessions.write().await.remove(&id);
        let Some(session) = session else { return };
        session.close().await;

        if let Some(token) = &session.device_token {
            if let Some(set) = self.by_device.write().await.get_mut(token) {
                set.shift_remove(&id);
            }
        }
        self.transports.write().await.retain(|_, sid| *sid != id);

        if let Some(ip) = self.ip_by_session.write().await.remove(&id) {
            self.release_ip_slot(&ip).await;
        }
    }

    /// Admission control (spec §4.4/P8/P9): evict the oldest session for a
    /// device over `maxPerDevice`, and hard-deny if the IP is at
    /// `maxPerIP`.
    pub async fn enforce_connection_limits(&self, device_token: Option<&str>, ip: &str) -> Admission {
        {
            let counts = self.by_ip.read().await;
            if counts.get(ip).copied().unwrap_or(0) >= self.config.max_per_ip {
                return Admission {
                    allowed: false,
                    reason: Some("Connection limit exceeded for this IP address".to_owned()),
                };
            }
        }

        if let Some(token) = device_token {
            let oldest = {
                let by_device = self.by_device.read().await;
                by_device.get(token).filter(|set| set.len() >= self.config.max_per_device).and_then(|set| set.iter().next().copied())
            };
            if let Some(oldest_id) = oldest {
                self.remove_session(oldest_id).await;
            }
        }

        *self.by_ip.write().await.entry(ip.to_owned()).or_insert(0) += 1;
        Admission { allowed: true, reason: None }
    }

    /// Release one IP admission slot (called when a session tied to `ip`
    /// is torn down, so long-lived proxies don't leak IP counts).
    pub async fn release_ip_slot(&self, ip: &str) {
        let mut counts = self.by_ip.write().await;
        if let Some(count) = counts.get_mut(ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(ip);
            }
        }
    }

    /// Periodic sweep removing sessions whose last client attach exceeds
    /// the configured TTL. Grounded on the reference repo's
    /// `spawn_health_checker`: snapshot under a read lock, then act outside
    /// it so the sweep never holds the registry lock across session
    /// teardown.
    pub fn spawn_cleanup_task(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let interval = manager.config.cleanup_interval();
        let timeout = manager.config.timeout();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = manager.cancel.cancelled() => break,
                    _ = timer.tick() => {}
                }
                manager.cleanup_inactive(timeout).await;
            }
        });
    }

    /// Register an already-constructed session directly, bypassing the
    /// real telnet connect — used by tests that only exercise registry
    /// bookkeeping (admission control, device eviction, TTL reaping).
    #[cfg(test)]
    pub(crate) async fn insert_for_test(&self, session: Arc<Session>) {
        if let Some(token) = &session.device_token {
            self.by_device.write().await.entry(token.clone()).or_default().insert(session.id);
        }
        self.sessions.write().await.insert(session.id, session);
    }

    #[cfg(test)]
    pub(crate) async fn cleanup_inactive_for_test(&self, timeout: std::time::Duration) {
        self.cleanup_inactive(timeout).await;
    }

    async fn cleanup_inactive(&self, timeout: std::time::Duration) {
        let now = crate::buffer::epoch_ms();
        let timeout_ms = timeout.as_millis() as u64;

        let stale: Vec<Uuid> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| now.saturating_sub(s.last_client_attach_at_ms()) > timeout_ms)
                .map(|s| s.id)
                .collect()
        };

        for id in stale {
            tracing::info!(session_id = %id, "reaping session after TTL expiry");
            self.remove_session(id).await;
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
