// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded, ordered, replayable log of server output (spec §4.1).
//!
//! Unlike a flat byte ring (see the reference repo's `RingBuffer`, which this
//! module is grounded on), replay must preserve chunk boundaries and the
//! `data`/`gmcp` type tag, so chunks are kept whole in a `VecDeque` rather
//! than copied into a flat byte array.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

/// Tag distinguishing a chunk of raw telnet text from an extracted GMCP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Data,
    Gmcp,
}

/// A single retained unit of session output.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub kind: ChunkKind,
    pub payload: Vec<u8>,
    pub gmcp_package: Option<String>,
    pub gmcp_data: Option<String>,
}

/// Snapshot of buffer occupancy, for introspection/health surfaces.
#[derive(Debug, Clone, Copy)]
pub struct BufferStats {
    pub chunk_count: usize,
    pub occupied_bytes: usize,
    pub capacity_bytes: usize,
    pub oldest_sequence: u64,
    pub last_sequence: u64,
}

/// Fixed-capacity circular log of `Chunk`s, sequenced monotonically.
///
/// Sequence numbers are never reused and never skipped by the buffer itself
/// (gaps only appear across eviction, which is intentional: a gap tells the
/// client that data was permanently lost and it must re-query upstream).
#[derive(Debug)]
pub struct CircularBuffer {
    chunks: VecDeque<Chunk>,
    capacity_bytes: usize,
    occupied_bytes: usize,
    next_sequence: u64,
    last_sequence: u64,
}

impl CircularBuffer {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            capacity_bytes,
            occupied_bytes: 0,
            next_sequence: 1,
            last_sequence: 0,
        }
    }

    /// Append a chunk of output, evicting the oldest retained chunks until
    /// it fits. A single chunk larger than capacity is still stored whole
    /// (caller policy, per spec §4.1) — occupancy will exceed the cap until
    /// the next eviction-eligible append.
    pub fn append(
        &mut self,
        payload: Vec<u8>,
        kind: ChunkKind,
        gmcp: Option<(String, String)>,
    ) -> Chunk {
        let payload_len = payload.len();

        while !self.chunks.is_empty() && self.occupied_bytes + payload_len > self.capacity_bytes {
            if let Some(evicted) = self.chunks.pop_front() {
                self.occupied_bytes -= evicted.payload.len();
            }
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.last_sequence = sequence;

        let (gmcp_package, gmcp_data) = match gmcp {
            Some((pkg, data)) => (Some(pkg), Some(data)),
            None => (None, None),
        };

        let chunk = Chunk {
            sequence,
            timestamp_ms: epoch_ms(),
            kind,
            payload,
            gmcp_package,
            gmcp_data,
        };

        self.occupied_bytes += payload_len;
        self.chunks.push_back(chunk.clone());
        chunk
    }

    /// Every retained chunk with `sequence > seq`, in order. Empty if `seq`
    /// is at or ahead of the current sequence — not an error.
    pub fn replay_from(&self, seq: u64) -> Vec<Chunk> {
        self.chunks.iter().filter(|c| c.sequence > seq).cloned().collect()
    }

    /// Sequence of the most recently appended chunk, or `0` if the buffer
    /// has never had anything appended (preserved convention, spec §9).
    pub fn get_last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Alias kept distinct from `get_last_sequence` per spec §4.1's naming;
    /// both track the same monotonic counter in this implementation.
    pub fn get_current_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.occupied_bytes = 0;
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            chunk_count: self.chunks.len(),
            occupied_bytes: self.occupied_bytes,
            capacity_bytes: self.capacity_bytes,
            oldest_sequence: self.chunks.front().map(|c| c.sequence).unwrap_or(0),
            last_sequence: self.last_sequence,
        }
    }
}

pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
