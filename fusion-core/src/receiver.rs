//! # receiver
//!
//! Datagram intake: parses pose, lidar-chunk, and telemetry messages and
//! tracks the last-seen timestamp per rover per stream.
//!
//! ## Architecture
//! One logical `Receiver` is shared across every (rover, stream-kind)
//! socket loop. Loops live outside this crate (see `fusion-server`); each
//! one calls `accept` on every datagram it reads and forwards the
//! resulting `Delivery` onward — lidar chunks to the assembler, pose and
//! telemetry updates nowhere but the timestamp table.
//!
//! ## Invariants
//! - A malformed or short datagram is discarded: it does not advance any
//!   timestamp and never reaches the assembler.
//! - `accept` never blocks; all I/O happens in the caller's socket loop.

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Mutex;

use lidar_types::{Delivery, ParseError, RoverId, StreamKind};
use tracing::debug;

/// Most recently observed timestamp per stream for one rover.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamTimestamps {
    pub pose: Option<f64>,
    pub lidar: Option<f64>,
    pub telemetry: Option<f64>,
}

impl StreamTimestamps {
    fn record(&mut self, kind: StreamKind, ts: f64) {
        let slot = match kind {
            StreamKind::Pose => &mut self.pose,
            StreamKind::Lidar => &mut self.lidar,
            StreamKind::Telemetry => &mut self.telemetry,
        };
        *slot = Some(ts);
    }
}

/// Datagram receiver shared across every rover endpoint.
///
/// Thread-safe: `accept` may be called concurrently from any number of
/// per-endpoint socket loops.
pub struct Receiver {
    timestamps: Mutex<HashMap<RoverId, StreamTimestamps>>,
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Receiver {
    pub fn new() -> Self {
        Self {
            timestamps: Mutex::new(HashMap::new()),
        }
    }

    /// Parse a datagram of the given kind from `rover_id`. On success,
    /// records the message's embedded timestamp (last-writer-wins). On
    /// failure the datagram is discarded with no side effect.
    pub fn accept(
        &self,
        rover_id: RoverId,
        kind: StreamKind,
        bytes: &[u8],
    ) -> Result<Delivery, ParseError> {
        let delivery = lidar_types::parse_message(kind, bytes)?;
        let ts = delivery.timestamp_sec();
        self.timestamps
            .lock()
            .unwrap()
            .entry(rover_id)
            .or_default()
            .record(kind, ts);
        debug!(rover_id, ?kind, ts, "accepted datagram");
        Ok(delivery)
    }

    /// Snapshot of the last-seen timestamps for `rover_id`.
    pub fn get_stream_timestamps(&self, rover_id: RoverId) -> StreamTimestamps {
        self.timestamps
            .lock()
            .unwrap()
            .get(&rover_id)
            .copied()
            .unwrap_or_default()
    }

    /// Write a single command byte to `endpoint`. Attempts exactly once;
    /// the caller is responsible for any retry (see `fusion-server`'s
    /// command module for the recommended one-shot-retry-after-50ms
    /// policy).
    pub fn send_command(
        &self,
        rover_id: RoverId,
        command_byte: u8,
        endpoint: SocketAddr,
    ) -> std::io::Result<()> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.send_to(&[command_byte], endpoint)?;
        debug!(rover_id, command_byte, %endpoint, "sent command");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lidar_types::{encode_pose, encode_telemetry, PoseSample, TelemetrySample};

    #[test]
    fn accept_records_last_writer_wins_timestamp() {
        let recv = Receiver::new();
        let p1 = encode_pose(&PoseSample {
            timestamp_sec: 1.0,
            position: [0.0; 3],
            rotation_deg: [0.0; 3],
        });
        let p2 = encode_pose(&PoseSample {
            timestamp_sec: 2.0,
            position: [0.0; 3],
            rotation_deg: [0.0; 3],
        });
        recv.accept(7, StreamKind::Pose, &p1).unwrap();
        recv.accept(7, StreamKind::Pose, &p2).unwrap();
        assert_eq!(recv.get_stream_timestamps(7).pose, Some(2.0));
    }

    #[test]
    fn malformed_datagram_does_not_advance_timestamp() {
        let recv = Receiver::new();
        let good = encode_telemetry(&TelemetrySample {
            timestamp_sec: 3.0,
            button_states: 0,
        });
        recv.accept(1, StreamKind::Telemetry, &good).unwrap();
        assert!(recv.accept(1, StreamKind::Telemetry, &[0u8; 3]).is_err());
        assert_eq!(recv.get_stream_timestamps(1).telemetry, Some(3.0));
    }

    #[test]
    fn unknown_rover_returns_default_timestamps() {
        let recv = Receiver::new();
        assert_eq!(recv.get_stream_timestamps(999), StreamTimestamps::default());
    }
}
