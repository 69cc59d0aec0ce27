//! Runtime configuration for the fusion server, read from the environment
//! with the defaults from the design doc. Mirrors the hub's env-var config
//! pattern: every field falls back to a sane default if unset.

use std::collections::BTreeMap;

use fusion_core::RoverId;

pub struct ServerConfig {
    /// Rover ids this process listens for. Endpoint ports are derived per
    /// the §6 convention: pose = 9000+id, lidar = 10000+id, telemetry =
    /// 11000+id, command = 8000+id.
    pub rover_ids: Vec<RoverId>,
    /// Per-frame heights-data export budget, in bytes.
    pub upload_budget_bytes: usize,
    /// Fusion driver tick period, in milliseconds.
    pub tick_period_ms: u64,
    /// Tile side length, in meters.
    pub tile_size: f64,
    /// Finest quadtree cell size, in meters.
    pub base_cell_resolution: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rover_ids: parse_rover_ids(
                std::env::var("FUSION_ROVER_IDS").unwrap_or_else(|_| "1".to_string()),
            ),
            upload_budget_bytes: std::env::var("FUSION_UPLOAD_BUDGET_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(fusion_core::config::DEFAULT_UPLOAD_BUDGET_BYTES),
            tick_period_ms: std::env::var("FUSION_TICK_PERIOD_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            tile_size: std::env::var("FUSION_TILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(fusion_core::config::DEFAULT_TILE_SIZE),
            base_cell_resolution: std::env::var("FUSION_BASE_CELL_RESOLUTION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(fusion_core::config::DEFAULT_BASE_CELL_RESOLUTION),
        }
    }
}

fn parse_rover_ids(raw: String) -> Vec<RoverId> {
    raw.split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

/// Endpoint allocation convention from §6 (not enforced, purely a default
/// mapping a deployment may override).
pub struct RoverEndpoints {
    pub pose_port: u16,
    pub lidar_port: u16,
    pub telemetry_port: u16,
    pub command_port: u16,
}

pub fn default_endpoints(rover_ids: &[RoverId]) -> BTreeMap<RoverId, RoverEndpoints> {
    rover_ids
        .iter()
        .map(|&id| {
            (
                id,
                RoverEndpoints {
                    pose_port: 9000 + id as u16,
                    lidar_port: 10000 + id as u16,
                    telemetry_port: 11000 + id as u16,
                    command_port: 8000 + id as u16,
                },
            )
        })
        .collect()
}
