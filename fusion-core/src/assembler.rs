//! # assembler
//!
//! Reconstructs complete lidar scans from out-of-order chunks; drops scans
//! that never complete within the partial-scan timeout.
//!
//! ## Architecture
//! State lives behind a single mutex, matching the receiver threads'
//! calling pattern: any number of socket loops call `add_chunk`
//! concurrently, while the fusion driver periodically calls
//! `retrieve_completed` and `maintenance`. Critical sections are short —
//! O(points_in_chunk) on add, O(partial count) on maintenance.
//!
//! ## Invariants
//! - Keys compare by exact rover-id equality and exact timestamp
//!   bit-equality (the timestamp is an opaque scan identifier, not a
//!   value to be compared approximately).
//! - A `CompletedScan`'s points appear in the order their bearing chunks
//!   were accepted, not sorted by `chunk_index`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lidar_types::{LidarChunkHeader, LidarPoint, RoverId, MAX_POINTS_PER_CHUNK};
use tracing::{trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::PARTIAL_TIMEOUT;

/// Identifies one scan: a rover and its opaque, sender-assigned timestamp.
/// Compared by exact bit-equality, not by numeric closeness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ScanKey {
    rover_id: RoverId,
    timestamp_bits: u64,
}

impl ScanKey {
    fn new(rover_id: RoverId, timestamp_sec: f64) -> Self {
        Self {
            rover_id,
            timestamp_bits: timestamp_sec.to_bits(),
        }
    }
}

/// A scan still missing one or more chunks.
struct PartialScan {
    first_arrival: f64,
    total_chunks: u32,
    received: Vec<bool>,
    points: Vec<LidarPoint>,
}

impl PartialScan {
    fn new(now: f64, total_chunks: u32) -> Self {
        Self {
            first_arrival: now,
            total_chunks,
            received: vec![false; total_chunks as usize],
            points: Vec::with_capacity(total_chunks as usize * MAX_POINTS_PER_CHUNK),
        }
    }

    fn is_complete(&self) -> bool {
        self.received.iter().all(|&b| b)
    }
}

/// A fully received scan, produced exactly once and consumed by the
/// elevation map.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedScan {
    pub rover_id: RoverId,
    pub timestamp_sec: f64,
    pub points: Vec<LidarPoint>,
}

/// What happened to a chunk handed to `add_chunk`. Useful for logging and
/// for asserting edge-case behavior in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddChunkOutcome {
    /// Accepted into a new or existing partial scan.
    Accepted,
    /// Accepted, and this was the chunk that completed the scan.
    Completed,
    /// Dropped: this chunk_index was already received for this key.
    DuplicateDropped,
    /// Dropped: chunk_index >= the key's established total_chunks.
    OutOfRangeDropped,
}

struct AssemblerState {
    partials: HashMap<ScanKey, PartialScan>,
    completed: Vec<CompletedScan>,
}

/// Reassembles chunked lidar scans per (rover-id, timestamp).
pub struct Assembler {
    clock: Arc<dyn Clock>,
    state: Mutex<AssemblerState>,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl Assembler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(AssemblerState {
                partials: HashMap::new(),
                completed: Vec::new(),
            }),
        }
    }

    /// Add one chunk's points to the partial scan identified by
    /// `(rover_id, header.timestamp_sec)`, creating it if this is the
    /// first chunk seen for that key.
    pub fn add_chunk(
        &self,
        rover_id: RoverId,
        header: LidarChunkHeader,
        points: Vec<LidarPoint>,
    ) -> AddChunkOutcome {
        let key = ScanKey::new(rover_id, header.timestamp_sec);
        let now = self.clock.now_sec();
        let mut state = self.state.lock().unwrap();

        let partial = state
            .partials
            .entry(key)
            .or_insert_with(|| PartialScan::new(now, header.total_chunks));

        if header.chunk_index >= partial.total_chunks {
            warn!(
                rover_id,
                chunk_index = header.chunk_index,
                total_chunks = partial.total_chunks,
                "assembler: out-of-range chunk dropped"
            );
            return AddChunkOutcome::OutOfRangeDropped;
        }

        if partial.received[header.chunk_index as usize] {
            trace!(rover_id, chunk_index = header.chunk_index, "assembler: duplicate chunk dropped");
            return AddChunkOutcome::DuplicateDropped;
        }

        partial.received[header.chunk_index as usize] = true;
        partial.points.extend(points);

        if partial.is_complete() {
            let partial = state.partials.remove(&key).unwrap();
            state.completed.push(CompletedScan {
                rover_id,
                timestamp_sec: header.timestamp_sec,
                points: partial.points,
            });
            AddChunkOutcome::Completed
        } else {
            AddChunkOutcome::Accepted
        }
    }

    /// Drain every scan completed since the last call.
    pub fn retrieve_completed(&self) -> Vec<CompletedScan> {
        let mut state = self.state.lock().unwrap();
        std::mem::take(&mut state.completed)
    }

    /// Evict every partial scan whose first-chunk age exceeds
    /// `PARTIAL_TIMEOUT`. Evicted scans are discarded silently.
    pub fn maintenance(&self, now: f64) {
        let mut state = self.state.lock().unwrap();
        let timeout_sec = PARTIAL_TIMEOUT.as_secs_f64();
        let before = state.partials.len();
        state
            .partials
            .retain(|_, partial| now - partial.first_arrival <= timeout_sec);
        let evicted = before - state.partials.len();
        if evicted > 0 {
            trace!(evicted, "assembler: evicted timed-out partial scans");
        }
    }

    /// Number of scans currently awaiting more chunks (diagnostic only).
    pub fn partial_count(&self) -> usize {
        self.state.lock().unwrap().partials.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::clock::ManualClock;

    fn header(ts: f64, idx: u32, total: u32, n: u32) -> LidarChunkHeader {
        LidarChunkHeader {
            timestamp_sec: ts,
            chunk_index: idx,
            total_chunks: total,
            points_in_chunk: n,
        }
    }

    fn points(n: usize, tag: f32) -> Vec<LidarPoint> {
        (0..n)
            .map(|i| LidarPoint {
                x: tag,
                y: i as f32,
                z: tag,
            })
            .collect()
    }

    #[test]
    fn p1_reassembly_exactness_any_order() {
        let asm = Assembler::default();
        asm.add_chunk(1, header(1.0, 2, 3, 50), points(50, 2.0));
        asm.add_chunk(1, header(1.0, 0, 3, 100), points(100, 0.0));
        let outcome = asm.add_chunk(1, header(1.0, 1, 3, 80), points(80, 1.0));
        assert_eq!(outcome, AddChunkOutcome::Completed);

        let completed = asm.retrieve_completed();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].points.len(), 230);
        // S2: delivery order preserved, not chunk_index order.
        assert_eq!(completed[0].points[0].x, 2.0);
        assert_eq!(completed[0].points[50].x, 0.0);
        assert_eq!(completed[0].points[150].x, 1.0);
    }

    #[test]
    fn p2_timeout_eviction() {
        let clock = Arc::new(ManualClock::new(0.0));
        let asm = Assembler::new(clock.clone());
        asm.add_chunk(1, header(5.0, 0, 4, 1), points(1, 0.0));
        clock.advance(0.25);
        asm.maintenance(clock.now_sec());
        assert_eq!(asm.partial_count(), 0);

        // S3: later chunks for the same key start a brand-new partial.
        for idx in 1..4 {
            asm.add_chunk(1, header(5.0, idx, 4, 1), points(1, 0.0));
        }
        assert!(asm.retrieve_completed().is_empty());
    }

    #[test]
    fn p3_duplicate_chunk_is_dropped_without_altering_scan() {
        let asm = Assembler::default();
        asm.add_chunk(1, header(1.0, 0, 2, 1), points(1, 9.0));
        let dup = asm.add_chunk(1, header(1.0, 0, 2, 1), points(1, 42.0));
        assert_eq!(dup, AddChunkOutcome::DuplicateDropped);
        let outcome = asm.add_chunk(1, header(1.0, 1, 2, 1), points(1, 9.0));
        assert_eq!(outcome, AddChunkOutcome::Completed);

        let completed = asm.retrieve_completed();
        assert_eq!(completed[0].points.len(), 2);
        assert!(completed[0].points.iter().all(|p| p.x == 9.0));
    }

    #[test]
    fn out_of_range_chunk_index_is_dropped_retaining_partial() {
        let asm = Assembler::default();
        asm.add_chunk(1, header(1.0, 0, 2, 1), points(1, 0.0));
        let outcome = asm.add_chunk(1, header(1.0, 5, 2, 1), points(1, 0.0));
        assert_eq!(outcome, AddChunkOutcome::OutOfRangeDropped);
        assert_eq!(asm.partial_count(), 1);
    }

    #[test]
    fn mismatched_total_chunks_keeps_first_observation_authoritative() {
        let asm = Assembler::default();
        asm.add_chunk(1, header(1.0, 0, 3, 1), points(1, 0.0));
        // Second chunk claims total_chunks=5, inconsistent with the
        // established partial (total=3); index 1 < 3 so it's accepted
        // under the first total_chunks, and index 4 is out of range.
        let outcome = asm.add_chunk(1, header(1.0, 4, 5, 1), points(1, 0.0));
        assert_eq!(outcome, AddChunkOutcome::OutOfRangeDropped);
        asm.add_chunk(1, header(1.0, 1, 5, 1), points(1, 0.0));
        let outcome = asm.add_chunk(1, header(1.0, 2, 5, 1), points(1, 0.0));
        assert_eq!(outcome, AddChunkOutcome::Completed);
    }

    #[test]
    fn distinct_rovers_do_not_share_keys() {
        let asm = Assembler::default();
        asm.add_chunk(1, header(1.0, 0, 1, 1), points(1, 0.0));
        asm.add_chunk(2, header(1.0, 0, 1, 1), points(1, 0.0));
        assert_eq!(asm.retrieve_completed().len(), 2);
    }
}
