//! Tunables for the fusion pipeline, with the defaults from the design doc.
//!
//! Mirrors the hub's env-var-overridable config pattern: every field has a
//! sane default and can be overridden by an environment variable at startup.

use std::time::Duration;

/// Points carried in a single lidar-chunk datagram, enforced at parse time
/// via `lidar_types::MAX_POINTS_PER_CHUNK`.
pub use lidar_types::MAX_POINTS_PER_CHUNK;

/// How long a partial scan may sit incomplete before `Assembler::maintenance`
/// evicts it, measured from the first chunk's wall-clock arrival.
pub const PARTIAL_TIMEOUT: Duration = Duration::from_millis(200);

/// Side length of a tile, in meters.
pub const DEFAULT_TILE_SIZE: f64 = 32.0;

/// Finest cell size a tile's quadtree refines down to, in meters.
pub const DEFAULT_BASE_CELL_RESOLUTION: f64 = 0.25;

/// Agree-zone threshold: |y - z_mean| <= this is treated as confirming noise.
pub const TAU_ACCEPT: f64 = 0.25;

/// Disagree-zone threshold: |y - z_mean| >= this is a candidate REMAP trigger.
pub const TAU_REPLACE: f64 = 0.7;

/// Minimum shift in z_mean since the last export before a tile is marked
/// dirty again.
pub const TAU_UPLOAD: f64 = 0.06;

/// Sample count a cell's confidence saturates at.
pub const N_SAT: u32 = 20;

/// Below this sample count, a single disagreement is enough to REMAP.
pub const N_CONF: u32 = 5;

/// Repeated disagreements required to REMAP a confirmed (n >= N_CONF) cell.
pub const K_DISAGREE: u8 = 3;

/// Window within which repeated disagreements count toward K_DISAGREE.
pub const DELTA_T_WINDOW: f64 = 1.0;

/// Recommended per-frame heights-data export budget, in bytes.
pub const DEFAULT_UPLOAD_BUDGET_BYTES: usize = 10 * 1024 * 1024;

/// Computes the quadtree max depth for a tile, D = ceil(log2(tile_size / base_cell_resolution)).
pub fn max_depth_for(tile_size: f64, base_cell_resolution: f64) -> u32 {
    (tile_size / base_cell_resolution).log2().ceil() as u32
}

/// Number of vertices per side of an exported height grid: 2^D + 1.
pub fn grid_n_vertices(max_depth: u32) -> usize {
    (1usize << max_depth) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_depth_is_seven() {
        assert_eq!(max_depth_for(DEFAULT_TILE_SIZE, DEFAULT_BASE_CELL_RESOLUTION), 7);
        assert_eq!(grid_n_vertices(7), 129);
    }
}
