//! # ingest
//!
//! Per-(rover, stream-kind) UDP socket loops. Each loop is its own tokio
//! task — the async equivalent of "one dedicated thread per endpoint,
//! blocking on datagram arrival" from the design doc. A loop never blocks
//! the fusion path: parse failures are logged and dropped, never
//! propagated.

use std::sync::Arc;

use fusion_core::{LidarChunkHeader, LidarPoint, Receiver, RoverId, StreamKind};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One chunk handed off from a lidar socket loop to the fusion driver.
pub struct ChunkDelivery {
    pub rover_id: RoverId,
    pub header: LidarChunkHeader,
    pub points: Vec<LidarPoint>,
}

/// Runs the receive loop for a single pose or telemetry endpoint. Parsed
/// messages only update `Receiver`'s timestamp table; nothing downstream
/// consumes them in the core.
pub async fn run_side_channel(
    receiver: Arc<Receiver>,
    rover_id: RoverId,
    kind: StreamKind,
    port: u16,
) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
    debug!(rover_id, ?kind, port, "listening");
    let mut buf = [0u8; 2048];
    loop {
        let (len, _addr) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!(rover_id, ?kind, "recv error: {e}");
                continue;
            }
        };
        if let Err(e) = receiver.accept(rover_id, kind, &buf[..len]) {
            warn!(rover_id, ?kind, "malformed datagram dropped: {e}");
        }
    }
}

/// Runs the receive loop for a rover's lidar endpoint, forwarding every
/// accepted chunk to the fusion driver over `tx`.
pub async fn run_lidar_channel(
    receiver: Arc<Receiver>,
    rover_id: RoverId,
    port: u16,
    tx: mpsc::UnboundedSender<ChunkDelivery>,
) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
    debug!(rover_id, port, "listening for lidar chunks");
    // A lidar datagram header declares up to MAX_POINTS_PER_CHUNK points
    // of 12 bytes each, plus a 20-byte header; pad generously.
    let mut buf = vec![0u8; 24 + fusion_core::MAX_POINTS_PER_CHUNK * 12];
    loop {
        let (len, _addr) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!(rover_id, "lidar recv error: {e}");
                continue;
            }
        };
        match receiver.accept(rover_id, StreamKind::Lidar, &buf[..len]) {
            Ok(fusion_core::Delivery::Lidar(chunk)) => {
                if tx
                    .send(ChunkDelivery {
                        rover_id,
                        header: chunk.header,
                        points: chunk.points,
                    })
                    .is_err()
                {
                    // Fusion driver has shut down; nothing left to do.
                    return Ok(());
                }
            }
            Ok(_) => unreachable!("StreamKind::Lidar always parses to Delivery::Lidar"),
            Err(e) => warn!(rover_id, "malformed lidar chunk dropped: {e}"),
        }
    }
}
