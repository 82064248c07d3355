// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration surface for the proxy (spec §6).
#[derive(Debug, Clone, clap::Args)]
pub struct ProxyConfig {
    /// Host to bind the client WebSocket listener on.
    #[arg(long, default_value = "0.0.0.0", env = "WS_HOST")]
    pub host: String,

    /// Port to listen on for client WebSocket connections.
    #[arg(long, default_value_t = 6200, env = "WS_PORT")]
    pub port: u16,

    /// Default telnet target host.
    #[arg(long, env = "TN_HOST")]
    pub tn_host: Option<String>,

    /// Default telnet target port.
    #[arg(long, env = "TN_PORT")]
    pub tn_port: Option<u16>,

    /// Refuse client-supplied host/port other than the configured default.
    #[arg(long, default_value_t = false, env = "ONLY_ALLOW_DEFAULT_SERVER")]
    pub only_allow_default_server: bool,

    /// Comma-separated list of allowed CORS origins, or `*`.
    #[arg(long, default_value = "*", env = "ALLOWED_ORIGINS")]
    pub allowed_origins: String,

    /// Honor `X-Real-IP` / `X-Forwarded-For` when behind a reverse proxy.
    #[arg(long, default_value_t = false, env = "TRUST_PROXY")]
    pub trust_proxy: bool,

    /// Session idle timeout (hours) before TTL reaping.
    #[arg(long, default_value_t = 24, env = "SESSION_TIMEOUT_HOURS")]
    pub timeout_hours: u64,

    /// Max concurrent sessions per device token.
    #[arg(long, default_value_t = 5, env = "SESSION_MAX_PER_DEVICE")]
    pub max_per_device: usize,

    /// Max concurrent sessions per client IP.
    #[arg(long, default_value_t = 10, env = "SESSION_MAX_PER_IP")]
    pub max_per_ip: usize,

    /// Circular output buffer capacity per session, in kilobytes.
    #[arg(long, default_value_t = 50, env = "BUFFER_SIZE_KB")]
    pub buffer_size_kb: usize,

    /// Trigger rate limit: max matches per trigger-id per minute.
    #[arg(long, default_value_t = 1, env = "TRIGGER_PER_TYPE_PER_MINUTE")]
    pub trigger_per_type_per_minute: u32,

    /// Trigger rate limit: max total matches per session per hour.
    #[arg(long, default_value_t = 10, env = "TRIGGER_TOTAL_PER_HOUR")]
    pub trigger_total_per_hour: u32,

    /// Minimum interval between silent pushes to the same session, in ms.
    #[arg(long, default_value_t = 1_200_000, env = "SILENT_PUSH_INTERVAL_MS")]
    pub silent_push_interval_ms: u64,

    /// Minimum interval between activity pushes to the same session, in ms.
    #[arg(long, default_value_t = 120_000, env = "ACTIVITY_PUSH_INTERVAL_MS")]
    pub activity_push_interval_ms: u64,

    /// How long to wait for a sync ack after an activity push before falling back, in ms.
    #[arg(long, default_value_t = 15_000, env = "ACTIVITY_ACK_TIMEOUT_MS")]
    pub activity_ack_timeout_ms: u64,

    /// Base cooldown between fallback silent pushes, in ms (doubles up to 10 min).
    #[arg(long, default_value_t = 60_000, env = "FALLBACK_COOLDOWN_MS")]
    pub fallback_cooldown_ms: u64,

    /// Max fallback silent pushes per tracked session per rolling hour.
    #[arg(long, default_value_t = 6, env = "MAX_FALLBACKS_PER_HOUR")]
    pub max_fallbacks_per_hour: u32,

    /// Max length (in chars) of the snippet included in an activity push.
    #[arg(long, default_value_t = 100, env = "MAX_SNIPPET_LENGTH")]
    pub max_snippet_length: usize,

    /// How often the TTL reaper sweeps the session registry, in seconds.
    #[arg(long, default_value_t = 300, env = "CLEANUP_INTERVAL_SECS")]
    pub cleanup_interval_secs: u64,

    /// How often stale trigger rate-limit entries are purged, in hours.
    #[arg(long, default_value_t = 48, env = "TRIGGER_CLEANUP_MAX_AGE_HOURS")]
    pub trigger_cleanup_max_age_hours: u64,
}

impl ProxyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_hours * 3600)
    }

    pub fn buffer_capacity_bytes(&self) -> usize {
        self.buffer_size_kb * 1024
    }

    pub fn silent_push_interval(&self) -> Duration {
        Duration::from_millis(self.silent_push_interval_ms)
    }

    pub fn activity_push_interval(&self) -> Duration {
        Duration::from_millis(self.activity_push_interval_ms)
    }

    pub fn activity_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.activity_ack_timeout_ms)
    }

    pub fn fallback_cooldown(&self) -> Duration {
        Duration::from_millis(self.fallback_cooldown_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn trigger_cleanup_max_age(&self) -> Duration {
        Duration::from_secs(self.trigger_cleanup_max_age_hours * 3600)
    }

    /// Whether a client-requested host/port is acceptable given
    /// `only_allow_default_server` and the configured default target.
    pub fn allows_target(&self, host: &str, port: u16) -> bool {
        if !self.only_allow_default_server {
            return true;
        }
        match (&self.tn_host, self.tn_port) {
            (Some(h), Some(p)) => h == host && p == port,
            _ => true,
        }
    }
}
