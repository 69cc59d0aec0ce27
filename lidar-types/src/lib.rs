//! # lidar-types
//!
//! Wire structures for the rover sensor uplink: pose, lidar-chunk, and
//! telemetry datagrams.
//!
//! These types are shared by:
//! - `fusion-core`: parsing inbound datagrams and reassembling scans
//! - `fusion-server`: binding sockets per (rover, stream-kind) endpoint
//!
//! ## Wire conventions
//!
//! - All multi-byte fields are little-endian, packed with no padding.
//! - One UDP datagram carries exactly one message; there is no framing or
//!   length prefix beyond the datagram boundary.
//! - Coordinates are in a shared world x/z (ground plane) / y (elevation) frame.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

/// Rover identifier, as provisioned on the sensor platform.
pub type RoverId = u32;

/// Maximum points carried in a single lidar-chunk datagram.
pub const MAX_POINTS_PER_CHUNK: usize = 100;

// ── Message kinds ──────────────────────────────────────────────────────────────

/// Which of the three rover streams a datagram belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Pose,
    Lidar,
    Telemetry,
}

/// A single returned lidar point in the shared world frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LidarPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl LidarPoint {
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Pose sample: (timestamp, position, rotation). Used only to refresh
/// `StreamTimestamps`; not consumed by fusion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseSample {
    pub timestamp_sec: f64,
    pub position: [f32; 3],
    pub rotation_deg: [f32; 3],
}

/// Header of a lidar-chunk datagram. `points_in_chunk` points follow
/// immediately after the header on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LidarChunkHeader {
    pub timestamp_sec: f64,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub points_in_chunk: u32,
}

impl LidarChunkHeader {
    pub const WIRE_LEN: usize = 8 + 4 + 4 + 4;
}

/// A parsed lidar-chunk datagram: header plus its points, in wire order.
#[derive(Debug, Clone, PartialEq)]
pub struct LidarChunk {
    pub header: LidarChunkHeader,
    pub points: Vec<LidarPoint>,
}

/// Telemetry sample: (timestamp, button bitmask).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub timestamp_sec: f64,
    pub button_states: u8,
}

/// A successfully parsed datagram, tagged by stream kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Pose(PoseSample),
    Lidar(LidarChunk),
    Telemetry(TelemetrySample),
}

impl Delivery {
    /// The timestamp embedded in the message, used for last-writer-wins
    /// bookkeeping in `StreamTimestamps`.
    pub fn timestamp_sec(&self) -> f64 {
        match self {
            Delivery::Pose(p) => p.timestamp_sec,
            Delivery::Lidar(c) => c.header.timestamp_sec,
            Delivery::Telemetry(t) => t.timestamp_sec,
        }
    }
}

/// Reasons a datagram is rejected before it reaches the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("datagram too short: need at least {need} bytes, got {got}")]
    TooShort { need: usize, got: usize },
    #[error("datagram length {got} does not match header-declared length {expected}")]
    LengthMismatch { expected: usize, got: usize },
    #[error("points_in_chunk {got} exceeds MAX_POINTS_PER_CHUNK {max}")]
    TooManyPoints { got: u32, max: usize },
}

// ── Pose (52 bytes): f64 timestamp; f32x3 position; f32x3 rotation ──────────

pub const POSE_WIRE_LEN: usize = 8 + 4 * 3 + 4 * 3;

pub fn parse_pose(mut bytes: &[u8]) -> Result<PoseSample, ParseError> {
    if bytes.len() != POSE_WIRE_LEN {
        return Err(ParseError::LengthMismatch {
            expected: POSE_WIRE_LEN,
            got: bytes.len(),
        });
    }
    let timestamp_sec = bytes.get_f64_le();
    let position = [bytes.get_f32_le(), bytes.get_f32_le(), bytes.get_f32_le()];
    let rotation_deg = [bytes.get_f32_le(), bytes.get_f32_le(), bytes.get_f32_le()];
    Ok(PoseSample {
        timestamp_sec,
        position,
        rotation_deg,
    })
}

pub fn encode_pose(pose: &PoseSample) -> BytesMut {
    let mut buf = BytesMut::with_capacity(POSE_WIRE_LEN);
    buf.put_f64_le(pose.timestamp_sec);
    for v in pose.position {
        buf.put_f32_le(v);
    }
    for v in pose.rotation_deg {
        buf.put_f32_le(v);
    }
    buf
}

// ── Lidar chunk (>=24 bytes header, then points_in_chunk * 12 bytes) ────────

pub fn parse_lidar_chunk(mut bytes: &[u8]) -> Result<LidarChunk, ParseError> {
    if bytes.len() < LidarChunkHeader::WIRE_LEN {
        return Err(ParseError::TooShort {
            need: LidarChunkHeader::WIRE_LEN,
            got: bytes.len(),
        });
    }
    let timestamp_sec = bytes.get_f64_le();
    let chunk_index = bytes.get_u32_le();
    let total_chunks = bytes.get_u32_le();
    let points_in_chunk = bytes.get_u32_le();

    if points_in_chunk as usize > MAX_POINTS_PER_CHUNK {
        return Err(ParseError::TooManyPoints {
            got: points_in_chunk,
            max: MAX_POINTS_PER_CHUNK,
        });
    }

    let expected_len = LidarChunkHeader::WIRE_LEN + points_in_chunk as usize * 12;
    let got_len = LidarChunkHeader::WIRE_LEN + bytes.remaining();
    if got_len != expected_len {
        return Err(ParseError::LengthMismatch {
            expected: expected_len,
            got: got_len,
        });
    }

    let mut points = Vec::with_capacity(points_in_chunk as usize);
    for _ in 0..points_in_chunk {
        points.push(LidarPoint {
            x: bytes.get_f32_le(),
            y: bytes.get_f32_le(),
            z: bytes.get_f32_le(),
        });
    }

    Ok(LidarChunk {
        header: LidarChunkHeader {
            timestamp_sec,
            chunk_index,
            total_chunks,
            points_in_chunk,
        },
        points,
    })
}

pub fn encode_lidar_chunk(chunk: &LidarChunk) -> BytesMut {
    let mut buf = BytesMut::with_capacity(LidarChunkHeader::WIRE_LEN + chunk.points.len() * 12);
    buf.put_f64_le(chunk.header.timestamp_sec);
    buf.put_u32_le(chunk.header.chunk_index);
    buf.put_u32_le(chunk.header.total_chunks);
    buf.put_u32_le(chunk.header.points_in_chunk);
    for p in &chunk.points {
        buf.put_f32_le(p.x);
        buf.put_f32_le(p.y);
        buf.put_f32_le(p.z);
    }
    buf
}

// ── Telemetry (9 bytes): f64 timestamp; u8 button_states ────────────────────

pub const TELEMETRY_WIRE_LEN: usize = 8 + 1;

pub fn parse_telemetry(mut bytes: &[u8]) -> Result<TelemetrySample, ParseError> {
    if bytes.len() != TELEMETRY_WIRE_LEN {
        return Err(ParseError::LengthMismatch {
            expected: TELEMETRY_WIRE_LEN,
            got: bytes.len(),
        });
    }
    let timestamp_sec = bytes.get_f64_le();
    let button_states = bytes.get_u8();
    Ok(TelemetrySample {
        timestamp_sec,
        button_states,
    })
}

pub fn encode_telemetry(t: &TelemetrySample) -> BytesMut {
    let mut buf = BytesMut::with_capacity(TELEMETRY_WIRE_LEN);
    buf.put_f64_le(t.timestamp_sec);
    buf.put_u8(t.button_states);
    buf
}

/// Parse a datagram of the given kind, dispatching to the matching decoder.
pub fn parse_message(kind: StreamKind, bytes: &[u8]) -> Result<Delivery, ParseError> {
    match kind {
        StreamKind::Pose => parse_pose(bytes).map(Delivery::Pose),
        StreamKind::Lidar => parse_lidar_chunk(bytes).map(Delivery::Lidar),
        StreamKind::Telemetry => parse_telemetry(bytes).map(Delivery::Telemetry),
    }
}
