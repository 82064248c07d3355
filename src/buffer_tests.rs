// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use proptest::prelude::*;

use super::*;

proptest! {
    /// P1: every append yields a chunk whose sequence is strictly greater
    /// than the previous one, for any sequence of payload sizes.
    #[test]
    fn p1_append_sequences_strictly_increase(sizes in prop::collection::vec(0usize..64, 1..32)) {
        let mut buf = CircularBuffer::new(4096);
        let mut previous = 0u64;
        for size in sizes {
            let chunk = buf.append(vec![0u8; size], ChunkKind::Data, None);
            prop_assert!(chunk.sequence > previous);
            previous = chunk.sequence;
        }
    }

    /// P2: replay_from(seq) always returns strictly increasing sequences,
    /// all greater than `seq`, regardless of how much was appended or
    /// evicted first.
    #[test]
    fn p2_replay_from_is_increasing_and_bounded(
        count in 0usize..40,
        cut in 0u64..40,
    ) {
        let mut buf = CircularBuffer::new(256);
        for i in 0..count {
            buf.append(vec![i as u8], ChunkKind::Data, None);
        }
        let replayed = buf.replay_from(cut);
        let mut previous = cut;
        for chunk in &replayed {
            prop_assert!(chunk.sequence > previous);
            previous = chunk.sequence;
        }
    }
}

#[test]
fn sequences_strictly_increase() {
    let mut buf = CircularBuffer::new(1024);
    let a = buf.append(b"hello".to_vec(), ChunkKind::Data, None);
    let b = buf.append(b"world".to_vec(), ChunkKind::Data, None);
    let c = buf.append(b"!".to_vec(), ChunkKind::Data, None);
    assert!(b.sequence > a.sequence);
    assert!(c.sequence > b.sequence);
    assert_eq!(a.sequence, 1);
    assert_eq!(c.sequence, 3);
}

#[test]
fn replay_from_returns_only_newer_chunks_in_order() {
    let mut buf = CircularBuffer::new(1024);
    for i in 0..5 {
        buf.append(vec![i], ChunkKind::Data, None);
    }
    let replayed = buf.replay_from(2);
    let seqs: Vec<u64> = replayed.iter().map(|c| c.sequence).collect();
    assert_eq!(seqs, vec![3, 4, 5]);
}

#[test]
fn replay_from_ahead_of_current_is_empty_not_error() {
    let mut buf = CircularBuffer::new(1024);
    buf.append(b"x".to_vec(), ChunkKind::Data, None);
    assert!(buf.replay_from(999).is_empty());
}

#[test]
fn eviction_keeps_sequences_monotonic_across_wrap() {
    let mut buf = CircularBuffer::new(10);
    for _ in 0..5 {
        buf.append(vec![0u8; 4], ChunkKind::Data, None);
    }
    let stats = buf.stats();
    assert!(stats.occupied_bytes <= 10 + 4); // at most one oversize straggler
    let replayed = buf.replay_from(0);
    let seqs: Vec<u64> = replayed.iter().map(|c| c.sequence).collect();
    for w in seqs.windows(2) {
        assert!(w[1] > w[0]);
    }
    // Oldest chunks were evicted, so low sequence numbers are gone.
    assert!(replayed.first().map(|c| c.sequence).unwrap_or(0) > 1);
}

#[test]
fn oversize_single_chunk_is_still_stored() {
    let mut buf = CircularBuffer::new(4);
    let chunk = buf.append(vec![0u8; 100], ChunkKind::Data, None);
    assert_eq!(chunk.sequence, 1);
    assert_eq!(buf.stats().occupied_bytes, 100);
    assert_eq!(buf.replay_from(0).len(), 1);
}

#[test]
fn get_last_sequence_on_empty_buffer_is_zero() {
    let buf = CircularBuffer::new(1024);
    assert_eq!(buf.get_last_sequence(), 0);
    assert_eq!(buf.get_current_sequence(), 0);
}

#[test]
fn gmcp_chunk_preserves_package_and_data() {
    let mut buf = CircularBuffer::new(1024);
    let chunk = buf.append(
        b"ignored-raw".to_vec(),
        ChunkKind::Gmcp,
        Some(("Char.Vitals".to_owned(), "{\"hp\":100}".to_owned())),
    );
    assert_eq!(chunk.kind, ChunkKind::Gmcp);
    assert_eq!(chunk.gmcp_package.as_deref(), Some("Char.Vitals"));
    assert_eq!(chunk.gmcp_data.as_deref(), Some("{\"hp\":100}"));
}

#[test]
fn clear_resets_occupancy_but_not_sequence_counter() {
    let mut buf = CircularBuffer::new(1024);
    buf.append(b"a".to_vec(), ChunkKind::Data, None);
    buf.append(b"b".to_vec(), ChunkKind::Data, None);
    buf.clear();
    assert_eq!(buf.stats().chunk_count, 0);
    assert_eq!(buf.stats().occupied_bytes, 0);
    // Next append still issues a fresh, higher sequence (no id reuse).
    let next = buf.append(b"c".to_vec(), ChunkKind::Data, None);
    assert_eq!(next.sequence, 3);
}
