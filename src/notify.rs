// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Abstract push-notification interface (spec §4.7). Real delivery (APNS
//! HTTP/2, JWT signing, retry/credential refresh) is explicitly out of
//! scope; only the trait and a logging reference implementation live here.

use crate::trigger::TriggerMatch;

/// The only touchpoint the core has with a push transport. `true` ⇔ the
/// remote acknowledged with a 2xx-equivalent status; retries, queueing, and
/// credential refresh are the notifier's concern, not the core's.
///
/// Implementations are plugged in generically (`BackgroundPushScheduler<N:
/// Notifier>`) rather than via a trait object, since this crate ships only
/// one real implementation and native `async fn` in traits isn't
/// dyn-compatible without boxing every call.
pub trait Notifier: Send + Sync {
    async fn send_silent_push(&self, device_token: &str, session_id: &str) -> bool;

    async fn send_activity_kit_push(&self, activity_token: &str, content_state: &serde_json::Value) -> bool;

    async fn send_notification(&self, device_token: &str, trigger_match: &TriggerMatch, session_id: &str) -> bool;
}

/// Reference implementation: logs the call and reports success. Used when
/// no real push credentials are configured.
#[derive(Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    async fn send_silent_push(&self, device_token: &str, session_id: &str) -> bool {
        tracing::debug!(device_token = %redact(device_token), session_id, "null notifier: silent push");
        true
    }

    async fn send_activity_kit_push(&self, activity_token: &str, content_state: &serde_json::Value) -> bool {
        tracing::debug!(activity_token = %redact(activity_token), %content_state, "null notifier: activity push");
        true
    }

    async fn send_notification(&self, device_token: &str, trigger_match: &TriggerMatch, session_id: &str) -> bool {
        tracing::debug!(
            device_token = %redact(device_token),
            trigger_id = %trigger_match.trigger_id,
            session_id,
            "null notifier: alert push"
        );
        true
    }
}

/// Never log a full device/activity token.
fn redact(token: &str) -> String {
    if token.len() <= 8 {
        "***".to_owned()
    } else {
        format!("{}***", &token[..4])
    }
}
