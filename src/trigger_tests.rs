// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn sid() -> Uuid {
    Uuid::new_v4()
}

#[test]
fn tell_trigger_extracts_sender_and_message() {
    let mut m = TriggerMatcher::new(1, 10);
    let got = m.try_match("Gandalf tells you: the ring must be destroyed", sid()).unwrap();
    assert_eq!(got.trigger_id, "tell");
    assert_eq!(got.sender.as_deref(), Some("Gandalf"));
    assert_eq!(got.message.as_deref(), Some("the ring must be destroyed"));
}

#[test]
fn death_trigger_has_no_captures() {
    let mut m = TriggerMatcher::new(1, 10);
    let got = m.try_match("You have died.", sid()).unwrap();
    assert_eq!(got.trigger_id, "death");
    assert!(got.sender.is_none());
}

#[test]
fn combat_trigger_captures_attacker() {
    let mut m = TriggerMatcher::new(1, 10);
    let got = m.try_match("A rabid goblin attacks you!", sid()).unwrap();
    assert_eq!(got.trigger_id, "combat");
    assert_eq!(got.sender.as_deref(), Some("A rabid goblin"));
}

#[test]
fn party_invite_trigger_matches() {
    let mut m = TriggerMatcher::new(1, 10);
    let got = m.try_match("Frodo invites you to join a party", sid()).unwrap();
    assert_eq!(got.trigger_id, "party-invite");
    assert_eq!(got.sender.as_deref(), Some("Frodo"));
}

#[test]
fn non_matching_text_returns_none() {
    let mut m = TriggerMatcher::new(1, 10);
    assert!(m.try_match("You walk north.", sid()).is_none());
}

#[test]
fn per_type_per_minute_suppresses_consecutive_matches() {
    let mut m = TriggerMatcher::new(1, 10);
    let session = sid();
    assert!(m.try_match("Gandalf tells you: hi", session).is_some());
    assert!(m.try_match("Gandalf tells you: hi again", session).is_none());
}

#[test]
fn different_sessions_have_independent_rate_limits() {
    let mut m = TriggerMatcher::new(1, 10);
    assert!(m.try_match("Gandalf tells you: hi", sid()).is_some());
    assert!(m.try_match("Gandalf tells you: hi", sid()).is_some());
}

#[test]
fn total_per_hour_caps_matches_across_trigger_types() {
    let mut m = TriggerMatcher::new(100, 2);
    let session = sid();
    assert!(m.try_match("You have died.", session).is_some());
    assert!(m.try_match("You are under attack!", session).is_some());
    assert!(m.try_match("You have been slain.", session).is_none());
}

#[yare::parameterized(
    tell = { "Gandalf tells you: hi", "tell" },
    page = { "Gandalf pages: meet at the gate", "page" },
    whisper = { "Gandalf whispers to you: careful", "whisper" },
    combat_attacks = { "A rabid goblin attacks you!", "combat" },
    combat_under_attack = { "You are under attack!", "combat" },
    death_died = { "You have died.", "death" },
    death_slain = { "You have been slain!", "death" },
    party_invite = { "Frodo invites you to join a party", "party-invite" },
)]
fn built_in_trigger_line_maps_to_expected_id(line: &str, expected_trigger_id: &str) {
    let mut m = TriggerMatcher::new(100, 100);
    let got = m.try_match(line, sid()).unwrap_or_else(|| panic!("expected a match for: {line}"));
    assert_eq!(got.trigger_id, expected_trigger_id);
}

#[test]
fn first_enabled_trigger_in_registration_order_wins() {
    // "tell" is registered before "page"; a line only "tells" should never
    // also satisfy "page", so this just exercises that matching stops at
    // the first hit without scanning the rest needlessly.
    let mut m = TriggerMatcher::new(1, 10);
    let got = m.try_match("Aragorn tells you: move out", sid()).unwrap();
    assert_eq!(got.trigger_id, "tell");
}
