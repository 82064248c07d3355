// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background push scheduling for backgrounded sessions (spec §4.5). No
//! pack repo coalesces/backs off pushes like this; the timer table is
//! authoritative from the spec itself. The per-session actor shape (one
//! mutex per tracked session, guaranteeing linearized updates) is grounded
//! on the reference repo's `upstream::health`/`poller` interval-plus-
//! cancellation-token pattern.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ProxyConfig;
use crate::notify::Notifier;
use crate::session::Session;

/// Bookkeeping for one session the scheduler is watching while it has no
/// attached clients.
struct TrackedSession {
    device_token: Option<String>,
    activity_token: Option<String>,
    world_name: String,
    connected_since_ms: u64,
    last_pushed_sequence: u64,
    last_ack_sequence: u64,
    last_silent_push_at: Option<Instant>,
    last_activity_push_at: Option<Instant>,
    fallback_backoff: Duration,
    fallback_count_hour: u32,
    fallback_hour_started_at: Instant,
    next_fallback_allowed_at: Option<Instant>,
    /// Cancelled and replaced on every new push/ack so a stale ack-timeout
    /// task becomes a no-op (spec §9: cancel timers atomically on close).
    ack_generation: CancellationToken,
}

impl TrackedSession {
    fn new(device_token: Option<String>, activity_token: Option<String>, world_name: String, last_pushed_sequence: u64) -> Self {
        Self {
            device_token,
            activity_token,
            world_name,
            connected_since_ms: crate::buffer::epoch_ms(),
            last_pushed_sequence,
            last_ack_sequence: 0,
            last_silent_push_at: None,
            last_activity_push_at: None,
            fallback_backoff: Duration::ZERO,
            fallback_count_hour: 0,
            fallback_hour_started_at: Instant::now(),
            next_fallback_allowed_at: None,
            ack_generation: CancellationToken::new(),
        }
    }
}

/// Schedules silent and activity pushes for sessions with no attached
/// clients, coalescing by interval and falling back on missed acks.
pub struct BackgroundPushScheduler<N: Notifier> {
    config: Arc<ProxyConfig>,
    notifier: Arc<N>,
    tracked: Mutex<HashMap<Uuid, Arc<Mutex<TrackedSession>>>>,
}

impl<N: Notifier + 'static> BackgroundPushScheduler<N> {
    pub fn new(config: Arc<ProxyConfig>, notifier: Arc<N>) -> Arc<Self> {
        Arc::new(Self { config, notifier, tracked: Mutex::new(HashMap::new()) })
    }

    /// Idempotent: create the `TrackedSession` record on first call;
    /// subsequent calls refresh the captured tokens without resetting
    /// `last_pushed_sequence`.
    pub async fn track(self: &Arc<Self>, session: &Session, world_name: impl Into<String>) {
        let activity_token = session.activity_token.lock().await.clone();
        let existing = self.tracked.lock().await.get(&session.id).cloned();

        match existing {
            Some(entry) => {
                let mut state = entry.lock().await;
                state.device_token = session.device_token.clone();
                state.activity_token = activity_token;
            }
            None => {
                let last_sequence = session.last_sequence().await;
                let tracked = Arc::new(Mutex::new(TrackedSession::new(
                    session.device_token.clone(),
                    activity_token,
                    world_name.into(),
                    last_sequence,
                )));
                self.tracked.lock().await.insert(session.id, tracked);
            }
        }
    }

    /// Cancel pending ack timers and forget the session.
    pub async fn untrack(&self, session_id: Uuid) {
        if let Some(tracked) = self.tracked.lock().await.remove(&session_id) {
            tracked.lock().await.ack_generation.cancel();
        }
    }

    /// Invoked after buffering new text while the session has no attached
    /// clients. No-op if untracked or if nothing new has arrived.
    pub async fn on_buffered_output(self: &Arc<Self>, session: &Session, latest_seq: u64, snippet_source: &str) {
        let Some(entry) = self.tracked.lock().await.get(&session.id).cloned() else { return };
        let mut state = entry.lock().await;

        if latest_seq <= state.last_pushed_sequence {
            return;
        }

        let snippet = normalize_snippet(snippet_source, self.config.max_snippet_length);
        let now = Instant::now();

        let should_activity = state.activity_token.is_some()
            && state.last_activity_push_at.map(|t| now.duration_since(t) >= self.config.activity_push_interval()).unwrap_or(true);
        let should_silent = state.device_token.is_some()
            && state.last_silent_push_at.map(|t| now.duration_since(t) >= self.config.silent_push_interval()).unwrap_or(true);

        if should_activity {
            let token = state.activity_token.clone().unwrap_or_default();
            let content = serde_json::json!({
                "status": "connected",
                "worldName": state.world_name,
                "lastOutputSnippet": snippet,
                "connectedSince": state.connected_since_ms,
                "lastSyncTime": crate::buffer::epoch_ms(),
            });
            if self.notifier.send_activity_kit_push(&token, &content).await {
                state.last_activity_push_at = Some(now);
                state.last_pushed_sequence = latest_seq;
                self.schedule_ack_timeout(Arc::clone(self), session.id, Arc::clone(&entry), latest_seq);
            }
        }

        if should_silent {
            let token = state.device_token.clone().unwrap_or_default();
            if self.notifier.send_silent_push(&token, &session.id.to_string()).await {
                state.last_silent_push_at = Some(now);
                state.last_pushed_sequence = latest_seq;
            }
        }
    }

    fn schedule_ack_timeout(&self, scheduler: Arc<Self>, session_id: Uuid, entry: Arc<Mutex<TrackedSession>>, pushed_seq: u64) {
        let timeout = self.config.activity_ack_timeout();
        let generation = {
            // Replace the cancellation token synchronously isn't possible
            // without awaiting the lock; spawn does so before sleeping.
            CancellationToken::new()
        };
        tokio::spawn(async move {
            {
                let mut state = entry.lock().await;
                state.ack_generation.cancel();
                state.ack_generation = generation.clone();
            }
            tokio::select! {
                _ = generation.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    scheduler.handle_ack_timeout(session_id, pushed_seq).await;
                }
            }
        });
    }

    /// Client reconnected and consumed up to `last_seq`.
    pub async fn record_sync_ack(&self, session_id: Uuid, last_seq: u64) {
        let Some(entry) = self.tracked.lock().await.get(&session_id).cloned() else { return };
        let mut state = entry.lock().await;
        state.last_ack_sequence = state.last_ack_sequence.max(last_seq);
        state.ack_generation.cancel();
        state.fallback_backoff = Duration::ZERO;
    }

    /// Fired `activityAckTimeoutMs` after an activity push with no sync
    /// ack. Sends a fallback silent push, subject to an hourly cap and
    /// exponential backoff.
    async fn handle_ack_timeout(&self, session_id: Uuid, pushed_seq: u64) {
        let Some(entry) = self.tracked.lock().await.get(&session_id).cloned() else { return };
        let mut state = entry.lock().await;

        if state.last_ack_sequence >= pushed_seq {
            return;
        }

        let now = Instant::now();
        if now.duration_since(state.fallback_hour_started_at) >= Duration::from_secs(3600) {
            state.fallback_count_hour = 0;
            state.fallback_hour_started_at = now;
        }
        if state.fallback_count_hour >= self.config.max_fallbacks_per_hour {
            return;
        }
        if let Some(next_allowed) = state.next_fallback_allowed_at {
            if now < next_allowed {
                return;
            }
        }

        let Some(device_token) = state.device_token.clone() else { return };
        if self.notifier.send_silent_push(&device_token, &session_id.to_string()).await {
            state.fallback_count_hour += 1;
            let backoff = if state.fallback_backoff.is_zero() { self.config.fallback_cooldown() } else { (state.fallback_backoff * 2).min(Duration::from_secs(600)) };
            state.fallback_backoff = backoff;
            state.next_fallback_allowed_at = Some(now + backoff);
        }
    }
}

/// Collapse runs of whitespace, trim, and truncate to `max_len` chars.
fn normalize_snippet(text: &str, max_len: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim();
    if trimmed.chars().count() <= max_len {
        trimmed.to_owned()
    } else {
        trimmed.chars().take(max_len).collect()
    }
}

#[cfg(test)]
#[path = "push_tests.rs"]
mod tests;
