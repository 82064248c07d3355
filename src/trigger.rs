// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pattern-based trigger matching against clean MUD text (spec §4.6). The
//! regex patterns are taken verbatim from the spec's built-in trigger
//! table; rate-limit bookkeeping follows the spec's own `RateLimitEntry`
//! naming, since no pack repo does anything structurally similar.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use regex::Regex;
use uuid::Uuid;

/// One registered trigger: a compiled pattern plus the id/type clients see.
pub struct Trigger {
    pub id: &'static str,
    pub trigger_type: &'static str,
    pattern: Regex,
}

/// A single match result, including the data the session-event pipeline
/// hands to the notifier.
#[derive(Debug, Clone)]
pub struct TriggerMatch {
    pub trigger_id: String,
    pub trigger_type: String,
    pub matched_text: String,
    pub sender: Option<String>,
    pub message: Option<String>,
}

/// Per-session rate-limit bookkeeping: when each trigger-id last fired
/// (for the per-minute limit) and every match timestamp in the trailing
/// hour (for the total-per-hour limit).
struct RateLimitEntry {
    last_fired: HashMap<String, Instant>,
    hourly_hits: Vec<Instant>,
    last_seen: Instant,
}

/// Matches incoming text against the built-in trigger set, subject to
/// per-session rate limits.
pub struct TriggerMatcher {
    triggers: Vec<Trigger>,
    per_type_per_minute: u32,
    total_per_hour: u32,
    rate_limits: HashMap<Uuid, RateLimitEntry>,
}

impl TriggerMatcher {
    pub fn new(per_type_per_minute: u32, total_per_hour: u32) -> Self {
        Self { triggers: built_in_triggers(), per_type_per_minute, total_per_hour, rate_limits: HashMap::new() }
    }

    /// Iterate triggers in registration order; return the first enabled
    /// match whose rate limit allows it. At most one match per call.
    pub fn try_match(&mut self, text: &str, session_id: Uuid) -> Option<TriggerMatch> {
        for line in text.lines() {
            for idx in 0..self.triggers.len() {
                let (id, trigger_type, captures_owned) = {
                    let trigger = &self.triggers[idx];
                    let Some(captures) = trigger.pattern.captures(line) else { continue };
                    (
                        trigger.id,
                        trigger.trigger_type,
                        (captures.get(1).map(|m| m.as_str().to_owned()), captures.get(2).map(|m| m.as_str().to_owned())),
                    )
                };
                if !self.admit(session_id, id) {
                    continue;
                }
                return Some(TriggerMatch {
                    trigger_id: id.to_owned(),
                    trigger_type: trigger_type.to_owned(),
                    matched_text: line.to_owned(),
                    sender: captures_owned.0,
                    message: captures_owned.1,
                });
            }
        }
        None
    }

    /// Whether a match against `trigger_id` for `session_id` is allowed
    /// right now, recording it if so (spec §4.6/P7).
    fn admit(&mut self, session_id: Uuid, trigger_id: &str) -> bool {
        let now = Instant::now();
        let per_type_per_minute = self.per_type_per_minute;
        let total_per_hour = self.total_per_hour;
        let entry = self.rate_limits.entry(session_id).or_insert_with(|| RateLimitEntry {
            last_fired: HashMap::new(),
            hourly_hits: Vec::new(),
            last_seen: now,
        });
        entry.last_seen = now;
        entry.hourly_hits.retain(|t| now.duration_since(*t) < Duration::from_secs(3600));

        if entry.hourly_hits.len() as u32 >= total_per_hour {
            return false;
        }

        if per_type_per_minute > 0 {
            if let Some(last) = entry.last_fired.get(trigger_id) {
                if now.duration_since(*last) < Duration::from_secs(60) {
                    return false;
                }
            }
        }

        entry.last_fired.insert(trigger_id.to_owned(), now);
        entry.hourly_hits.push(now);
        true
    }

    /// Periodic purge of rate-limit bookkeeping older than `max_age`,
    /// bounding memory (spec §9).
    pub fn cleanup_old_entries(&mut self, max_age: Duration) {
        let now = Instant::now();
        self.rate_limits.retain(|_, entry| now.duration_since(entry.last_seen) < max_age);
    }
}

fn built_in_triggers() -> Vec<Trigger> {
    let compile = |pattern: &str| {
        Regex::new(&format!("(?mi){pattern}")).unwrap_or_else(|e| panic!("invalid built-in trigger pattern: {e}"))
    };
    vec![
        Trigger {
            id: "tell",
            trigger_type: "tell",
            pattern: compile(r"^(?:\[?\w+\]?\s+)?([A-Za-z_-]+)\s+tells\s+(?:you|the\s+group)[:,]\s*(.+)$"),
        },
        Trigger {
            id: "page",
            trigger_type: "page",
            pattern: compile(r"^(?:\[?\w+\]?\s+)?([A-Za-z_-]+)\s+pages?[:,]?\s*(.+)$"),
        },
        Trigger {
            id: "whisper",
            trigger_type: "whisper",
            pattern: compile(r"^(?:\[?\w+\]?\s+)?([A-Za-z_-]+)\s+whispers(?:\s+to\s+you)?[:,]\s*(.+)$"),
        },
        Trigger {
            id: "combat",
            trigger_type: "combat",
            pattern: compile(r"^(?:You are under attack|(.+?)\s+attacks\s+you)[!.]?$"),
        },
        Trigger {
            id: "death",
            trigger_type: "death",
            pattern: compile(r"^(?:You have died|You are DEAD|You have been slain)[!.]?$"),
        },
        Trigger {
            id: "party-invite",
            trigger_type: "party-invite",
            pattern: compile(
                r"^(?:\[?\w+\]?\s+)?([A-Za-z_-]+)\s+invites?\s+you\s+(?:to join|into)\s+(?:a\s+party|their\s+group)",
            ),
        },
    ]
}

#[cfg(test)]
#[path = "trigger_tests.rs"]
mod tests;
