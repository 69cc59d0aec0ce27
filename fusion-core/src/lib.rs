//! # fusion-core
//!
//! The rover-to-terrain fusion pipeline: datagram receiver, scan
//! reassembler, and quadtree elevation map. Pure in-memory logic with no
//! process lifecycle, rendering, or configuration-loading concerns — those
//! are external collaborators wired up by `fusion-server`.

pub mod assembler;
pub mod clock;
pub mod config;
pub mod elevation;
pub mod receiver;

pub use assembler::{AddChunkOutcome, Assembler, CompletedScan};
pub use clock::{Clock, ManualClock, SystemClock};
pub use elevation::{ElevationMap, TileKey, TileUpdate};
pub use receiver::{Receiver, StreamTimestamps};

pub use lidar_types::{
    Delivery, LidarChunk, LidarChunkHeader, LidarPoint, ParseError, PoseSample, RoverId,
    StreamKind, TelemetrySample, MAX_POINTS_PER_CHUNK,
};
