//! # driver
//!
//! The fusion driver: the single task that owns the elevation map and
//! drives it serially, per the concurrency model in the design doc. It
//! drains chunks into the assembler, evicts timed-out partials, integrates
//! every completed scan, and hands budgeted dirty-tile updates to
//! whatever external collaborator is listening (here: a trace log — a
//! real renderer is out of scope for this crate).

use std::sync::Arc;

use fusion_core::{Assembler, ElevationMap, SystemClock};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, Duration};
use tracing::{debug, info};

use crate::ingest::ChunkDelivery;

pub async fn run(
    assembler: Arc<Assembler>,
    elevation: Arc<Mutex<ElevationMap>>,
    mut chunks: mpsc::UnboundedReceiver<ChunkDelivery>,
    tick_period_ms: u64,
    upload_budget_bytes: usize,
) {
    let clock = SystemClock;
    let mut tick = interval(Duration::from_millis(tick_period_ms));

    loop {
        tokio::select! {
            _ = tick.tick() => {
                tick_once(&assembler, &elevation, &clock, upload_budget_bytes).await;
            }
            delivery = chunks.recv() => {
                match delivery {
                    Some(ChunkDelivery { rover_id, header, points }) => {
                        assembler.add_chunk(rover_id, header, points);
                    }
                    None => {
                        info!("all lidar ingest channels closed, shutting down fusion driver");
                        return;
                    }
                }
            }
        }
    }
}

async fn tick_once(
    assembler: &Assembler,
    elevation: &Mutex<ElevationMap>,
    clock: &fusion_core::SystemClock,
    upload_budget_bytes: usize,
) {
    use fusion_core::Clock;
    let now = clock.now_sec();
    assembler.maintenance(now);

    let completed = assembler.retrieve_completed();
    if completed.is_empty() {
        return;
    }

    let mut map = elevation.lock().await;
    for scan in &completed {
        map.integrate_scan(&scan.points, scan.timestamp_sec);
    }
    let updates = map.consume_dirty_tiles_budgeted(upload_budget_bytes);
    drop(map);

    if !updates.is_empty() {
        debug!(
            scans = completed.len(),
            dirty_tiles = updates.len(),
            "fusion tick: scans integrated, tile updates ready for export"
        );
    }
}
