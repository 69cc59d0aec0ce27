//! # elevation
//!
//! The persistent 2.5D elevation field: a grid of tiles, each backed by an
//! adaptive quadtree of per-cell elevation statistics, updated from
//! completed scans with an agree/disagree policy that tells measurement
//! noise apart from genuine terrain change.
//!
//! ## Geometry
//! A tile is a `tile_size`-meter square, axis-aligned in x/z. Tile
//! `(tx, tz)` covers `[tx*tile_size, (tx+1)*tile_size) x [tz*tile_size,
//! (tz+1)*tile_size)`. Each tile's quadtree refines to depth
//! `D = ceil(log2(tile_size / base_cell_resolution))`, exporting a
//! `(2^D+1)^2` vertex height grid whose edge rows/columns coincide with
//! the neighboring tile's.
//!
//! ## Invariants
//! - A cell transition that moves z_mean by more than TAU_UPLOAD, or
//!   performs a REMAP, or initializes a cell, marks the owning tile dirty
//!   before `integrate_scan` returns.
//! - Tiles are created lazily on first point, then persist for the life
//!   of the map; nothing evicts them.

use indexmap::IndexMap;
use lidar_types::LidarPoint;
use tracing::trace;

use crate::config::{
    DELTA_T_WINDOW, K_DISAGREE, N_CONF, N_SAT, TAU_ACCEPT, TAU_REPLACE, TAU_UPLOAD,
};

/// Integer tile coordinate. World origin of the tile is `(tx*tile_size,
/// tz*tile_size)` in the x/z plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub tx: i32,
    pub tz: i32,
}

fn tile_key_for(x: f64, z: f64, tile_size: f64) -> TileKey {
    TileKey {
        tx: (x / tile_size).floor() as i32,
        tz: (z / tile_size).floor() as i32,
    }
}

// Quadrant indices within a QuadNode::Internal's four children.
const SW: usize = 0;
const SE: usize = 1;
const NW: usize = 2;
const NE: usize = 3;

/// Per-leaf elevation statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElevCell {
    pub z_mean: f64,
    pub z_var: f64,
    pub n: u32,
    pub disagree_hits: u8,
    pub last_disagree_ts: f64,
    pub prev_z_mean: f64,
    pub valid: bool,
    pub dirty: bool,
    pub changed: bool,
}

impl Default for ElevCell {
    fn default() -> Self {
        Self {
            z_mean: 0.0,
            z_var: 0.0,
            n: 0,
            disagree_hits: 0,
            last_disagree_ts: f64::NEG_INFINITY,
            prev_z_mean: 0.0,
            valid: false,
            dirty: false,
            changed: false,
        }
    }
}

impl ElevCell {
    /// Integrate one elevation sample. Returns true if this call set the
    /// DIRTY flag (i.e. the owning tile must be marked dirty).
    fn integrate(&mut self, y: f64, now: f64) -> bool {
        if !self.valid {
            self.z_mean = y;
            self.prev_z_mean = y;
            self.z_var = 0.0;
            self.n = 1;
            self.disagree_hits = 0;
            self.valid = true;
            self.changed = true;
            self.dirty = true;
            return true;
        }

        let dz = (y - self.z_mean).abs();

        if dz <= TAU_ACCEPT {
            let n_new = (self.n + 1).min(N_SAT);
            let z_mean_old = self.z_mean;
            self.z_mean += (y - self.z_mean) / n_new as f64;
            self.z_var = 0.9 * self.z_var + 0.1 * (y - z_mean_old).powi(2);
            self.n = n_new;
            self.disagree_hits = 0;
            if (self.z_mean - self.prev_z_mean).abs() > TAU_UPLOAD {
                self.prev_z_mean = self.z_mean;
                self.dirty = true;
                return true;
            }
            false
        } else if dz >= TAU_REPLACE {
            if now - self.last_disagree_ts <= DELTA_T_WINDOW {
                self.disagree_hits = self.disagree_hits.saturating_add(1);
            } else {
                self.disagree_hits = 1;
            }
            self.last_disagree_ts = now;

            if self.n < N_CONF || self.disagree_hits >= K_DISAGREE {
                self.z_mean = y;
                self.prev_z_mean = y;
                self.z_var = 0.0;
                self.n = 1;
                self.disagree_hits = 0;
                self.changed = true;
                self.valid = true;
                self.dirty = true;
                true
            } else {
                false
            }
        } else {
            // Gray zone: soft EMA, no remap candidacy tracked.
            self.z_mean += 0.1 * (y - self.z_mean);
            let mut went_dirty = false;
            if (self.z_mean - self.prev_z_mean).abs() > TAU_UPLOAD {
                self.prev_z_mean = self.z_mean;
                self.dirty = true;
                went_dirty = true;
            }
            if now - self.last_disagree_ts > DELTA_T_WINDOW {
                self.disagree_hits = 0;
            }
            went_dirty
        }
    }
}

/// A quadtree node: either a leaf cell or four quadrant children
/// (SW, SE, NW, NE).
#[derive(Debug, Clone)]
enum QuadNode {
    Leaf(ElevCell),
    Internal(Box<[QuadNode; 4]>),
}

impl QuadNode {
    fn count_leaves(&self) -> usize {
        match self {
            QuadNode::Leaf(_) => 1,
            QuadNode::Internal(children) => children.iter().map(QuadNode::count_leaves).sum(),
        }
    }
}

/// Splits a leaf in place into four children, cloning the parent cell
/// into each quadrant, and returns a mutable reference to the child
/// selected by `(east, north)`.
fn descend_mut(
    node: &mut QuadNode,
    x: f64,
    z: f64,
    cx: f64,
    cz: f64,
    half: f64,
    depth: u32,
    max_depth: u32,
) -> &mut ElevCell {
    if depth >= max_depth {
        return match node {
            QuadNode::Leaf(cell) => cell,
            QuadNode::Internal(_) => unreachable!("quadtree refined past max_depth"),
        };
    }

    if let QuadNode::Leaf(cell) = *node {
        *node = QuadNode::Internal(Box::new([
            QuadNode::Leaf(cell),
            QuadNode::Leaf(cell),
            QuadNode::Leaf(cell),
            QuadNode::Leaf(cell),
        ]));
    }

    let half2 = half / 2.0;
    let east = x >= cx;
    let north = z >= cz;
    let idx = match (east, north) {
        (false, false) => SW,
        (true, false) => SE,
        (false, true) => NW,
        (true, true) => NE,
    };
    let new_cx = if east { cx + half2 } else { cx - half2 };
    let new_cz = if north { cz + half2 } else { cz - half2 };

    match node {
        QuadNode::Internal(children) => {
            descend_mut(&mut children[idx], x, z, new_cx, new_cz, half2, depth + 1, max_depth)
        }
        QuadNode::Leaf(_) => unreachable!(),
    }
}

/// Read-only counterpart of `descend_mut`: walks toward `(x, z)` without
/// ever splitting, stopping at whatever leaf already exists. Every
/// `QuadNode::Internal` owns all four children in this representation, so
/// the walk always terminates at a `Leaf`.
fn sample(node: &QuadNode, x: f64, z: f64, cx: f64, cz: f64, half: f64) -> Option<f64> {
    match node {
        QuadNode::Leaf(cell) => cell.valid.then_some(cell.z_mean),
        QuadNode::Internal(children) => {
            let half2 = half / 2.0;
            let east = x >= cx;
            let north = z >= cz;
            let idx = match (east, north) {
                (false, false) => SW,
                (true, false) => SE,
                (false, true) => NW,
                (true, true) => NE,
            };
            let new_cx = if east { cx + half2 } else { cx - half2 };
            let new_cz = if north { cz + half2 } else { cz - half2 };
            sample(&children[idx], x, z, new_cx, new_cz, half2)
        }
    }
}

/// One tile: a square region of the world owning one quadtree.
#[derive(Debug, Clone)]
struct Tile {
    origin_x: f64,
    origin_z: f64,
    tile_size: f64,
    max_depth: u32,
    dirty: bool,
    root: QuadNode,
}

impl Tile {
    fn new(key: TileKey, tile_size: f64, max_depth: u32) -> Self {
        Self {
            origin_x: key.tx as f64 * tile_size,
            origin_z: key.tz as f64 * tile_size,
            tile_size,
            max_depth,
            dirty: false,
            root: QuadNode::Leaf(ElevCell::default()),
        }
    }

    fn locate_leaf_mut(&mut self, x: f64, z: f64) -> &mut ElevCell {
        let cx = self.origin_x + self.tile_size / 2.0;
        let cz = self.origin_z + self.tile_size / 2.0;
        descend_mut(&mut self.root, x, z, cx, cz, self.tile_size / 2.0, 0, self.max_depth)
    }

    fn integrate_point(&mut self, x: f64, z: f64, y: f64, now: f64) {
        let went_dirty = self.locate_leaf_mut(x, z).integrate(y, now);
        if went_dirty {
            self.dirty = true;
        }
    }

    /// Ground elevation directly under `(x, z)`, if the containing leaf is
    /// valid. Returns `(z_mean, n)`.
    fn ground_at(&self, x: f64, z: f64) -> Option<(f64, u32)> {
        let cx = self.origin_x + self.tile_size / 2.0;
        let cz = self.origin_z + self.tile_size / 2.0;
        let leaf = locate_leaf_ref(&self.root, x, z, cx, cz, self.tile_size / 2.0);
        leaf.valid.then_some((leaf.z_mean, leaf.n))
    }

    fn build_height_grid(&self, n_vertices: usize) -> Vec<f32> {
        let mut heights = vec![0.0f32; n_vertices * n_vertices];
        let step = self.tile_size / (n_vertices - 1) as f64;
        let cx = self.origin_x + self.tile_size / 2.0;
        let cz = self.origin_z + self.tile_size / 2.0;
        let half = self.tile_size / 2.0;
        for j in 0..n_vertices {
            let z = self.origin_z + j as f64 * step;
            for i in 0..n_vertices {
                let x = self.origin_x + i as f64 * step;
                let h = sample(&self.root, x, z, cx, cz, half).unwrap_or(0.0);
                heights[j * n_vertices + i] = h as f32;
            }
        }
        heights
    }

    fn count_leaves(&self) -> usize {
        self.root.count_leaves()
    }
}

/// Same descent as `locate_leaf_mut` but read-only, for queries that must
/// not auto-split the quadtree. Since reads never refine the tree, a read
/// may land on a coarser leaf than a later write targeting the same
/// world point.
fn locate_leaf_ref<'a>(
    node: &'a QuadNode,
    x: f64,
    z: f64,
    cx: f64,
    cz: f64,
    half: f64,
) -> &'a ElevCell {
    match node {
        QuadNode::Leaf(cell) => cell,
        QuadNode::Internal(children) => {
            let half2 = half / 2.0;
            let east = x >= cx;
            let north = z >= cz;
            let idx = match (east, north) {
                (false, false) => SW,
                (true, false) => SE,
                (false, true) => NW,
                (true, true) => NE,
            };
            let new_cx = if east { cx + half2 } else { cx - half2 };
            let new_cz = if north { cz + half2 } else { cz - half2 };
            locate_leaf_ref(&children[idx], x, z, new_cx, new_cz, half2)
        }
    }
}

/// One tile's exported height grid, ready to hand to a renderer.
#[derive(Debug, Clone)]
pub struct TileUpdate {
    pub key: TileKey,
    pub tile_size: f64,
    /// Row-major, `heights[j * n + i]` at `(origin_x + i*step, origin_z + j*step)`.
    pub heights: Vec<f32>,
}

/// The persistent 2.5D elevation map: a grid of tiles, each owning one
/// quadtree.
pub struct ElevationMap {
    tiles: IndexMap<TileKey, Tile>,
    tile_size: f64,
    max_depth: u32,
    n_vertices: usize,
}

impl ElevationMap {
    pub fn new(tile_size: f64, base_cell_resolution: f64) -> Self {
        let max_depth = crate::config::max_depth_for(tile_size, base_cell_resolution);
        Self {
            tiles: IndexMap::new(),
            tile_size,
            max_depth,
            n_vertices: crate::config::grid_n_vertices(max_depth),
        }
    }

    fn tile_mut(&mut self, key: TileKey) -> &mut Tile {
        self.tiles
            .entry(key)
            .or_insert_with(|| Tile::new(key, self.tile_size, self.max_depth))
    }

    /// Integrate every point of a completed scan. Points with a
    /// non-finite coordinate are rejected without effect; the rest of the
    /// scan proceeds.
    pub fn integrate_scan(&mut self, points: &[LidarPoint], now: f64) {
        for p in points {
            if !p.is_finite() {
                continue;
            }
            let (x, y, z) = (p.x as f64, p.y as f64, p.z as f64);
            let key = tile_key_for(x, z, self.tile_size);
            self.tile_mut(key).integrate_point(x, z, y, now);
        }
    }

    /// Every tile whose dirty flag is set, rebuilt and cleared.
    pub fn consume_dirty_tiles(&mut self) -> Vec<TileUpdate> {
        let n = self.n_vertices;
        let mut out = Vec::new();
        for (key, tile) in self.tiles.iter_mut() {
            if !tile.dirty {
                continue;
            }
            out.push(TileUpdate {
                key: *key,
                tile_size: tile.tile_size,
                heights: tile.build_height_grid(n),
            });
            tile.dirty = false;
        }
        out
    }

    /// Same as `consume_dirty_tiles`, but yields at most
    /// `floor(max_bytes / (N^2 * 4))` tiles (minimum 1). Tiles not
    /// selected this call remain dirty. Traverses tiles in insertion
    /// order, so a continuously dirty tile is never starved across calls.
    pub fn consume_dirty_tiles_budgeted(&mut self, max_bytes: usize) -> Vec<TileUpdate> {
        let n = self.n_vertices;
        let bytes_per_tile = n * n * 4;
        let budget = (max_bytes / bytes_per_tile).max(1);

        let n_vertices = self.n_vertices;
        let mut out = Vec::with_capacity(budget);
        for (key, tile) in self.tiles.iter_mut() {
            if out.len() >= budget {
                break;
            }
            if !tile.dirty {
                continue;
            }
            out.push(TileUpdate {
                key: *key,
                tile_size: tile.tile_size,
                heights: tile.build_height_grid(n_vertices),
            });
            tile.dirty = false;
        }
        if out.is_empty() {
            trace!("consume_dirty_tiles_budgeted: no dirty tiles");
        }
        out
    }

    /// Ground elevation at `(x, z)`, or `None` if the tile or leaf has
    /// never been observed.
    pub fn get_ground_at(&self, x: f64, z: f64) -> Option<(f64, u32)> {
        let key = tile_key_for(x, z, self.tile_size);
        self.tiles.get(&key)?.ground_at(x, z)
    }

    /// `(num_tiles, num_leaves)`. `num_leaves` counts every leaf node
    /// across all tile quadtrees, valid or not.
    pub fn get_stats(&self) -> (usize, usize) {
        let num_leaves = self.tiles.values().map(Tile::count_leaves).sum();
        (self.tiles.len(), num_leaves)
    }

    pub fn get_grid_n_vertices(&self) -> usize {
        self.n_vertices
    }

    pub fn get_tile_size(&self) -> f64 {
        self.tile_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(x: f32, y: f32, z: f32) -> LidarPoint {
        LidarPoint { x, y, z }
    }

    #[test]
    fn p4_idempotent_cell_initialization() {
        let mut map = ElevationMap::new(32.0, 0.25);
        map.integrate_scan(&[pt(0.1, 5.0, 0.1)], 0.0);
        let (y, n) = map.get_ground_at(0.1, 0.1).unwrap();
        assert_eq!(y, 5.0);
        assert_eq!(n, 1);
        let (_, n_tiles) = map.get_stats();
        assert!(n_tiles > 0);
        let updates = map.consume_dirty_tiles();
        assert_eq!(updates.len(), 1);
    }

    #[test]
    fn p5_agree_zone_monotone_confidence() {
        let mut map = ElevationMap::new(32.0, 0.25);
        map.integrate_scan(&[pt(0.1, 5.0, 0.1)], 0.0);
        for i in 0..40 {
            map.integrate_scan(&[pt(0.1, 5.0 + if i % 2 == 0 { 0.05 } else { -0.05 }, 0.1)], i as f64);
        }
        let (_, n) = map.get_ground_at(0.1, 0.1).unwrap();
        assert_eq!(n, N_SAT);
    }

    #[test]
    fn s4_agree_then_remap() {
        let mut map = ElevationMap::new(32.0, 0.25);
        for i in 0..30 {
            let y = 5.0 + if i % 2 == 0 { 0.05 } else { -0.05 };
            map.integrate_scan(&[pt(0.1, y, 0.1)], i as f64);
        }
        let (y, n) = map.get_ground_at(0.1, 0.1).unwrap();
        assert!((y - 5.0).abs() < 0.1);
        assert_eq!(n, N_SAT);

        map.integrate_scan(&[pt(0.1, 7.0, 0.1)], 100.0);
        map.integrate_scan(&[pt(0.1, 7.0, 0.1)], 100.3);
        map.integrate_scan(&[pt(0.1, 7.0, 0.1)], 100.6);

        let (y, n) = map.get_ground_at(0.1, 0.1).unwrap();
        assert_eq!(y, 7.0);
        assert_eq!(n, 1);
    }

    #[test]
    fn s5_noise_rejection_vs_low_confidence_remap() {
        // Low confidence (n=1): a single disagreement remaps even
        // without K repeats.
        let mut map = ElevationMap::new(32.0, 0.25);
        map.integrate_scan(&[pt(0.1, 7.0, 0.1)], 0.0);
        map.integrate_scan(&[pt(0.1, 5.0, 0.1)], 0.1);
        let (y, n) = map.get_ground_at(0.1, 0.1).unwrap();
        assert_eq!(y, 5.0);
        assert_eq!(n, 1);

        // Confirmed (n >= N_CONF): one disagreement alone must not remap.
        let mut map2 = ElevationMap::new(32.0, 0.25);
        for i in 0..(N_CONF as i32) {
            map2.integrate_scan(&[pt(0.2, 7.0, 0.2)], i as f64 * 0.01);
        }
        let (_, n) = map2.get_ground_at(0.2, 0.2).unwrap();
        assert_eq!(n, N_CONF);
        map2.integrate_scan(&[pt(0.2, 5.0, 0.2)], 1.0);
        let (y, n) = map2.get_ground_at(0.2, 0.2).unwrap();
        assert!((y - 7.0).abs() < 1e-9, "single disagree on a confirmed cell must not remap");
        assert_eq!(n, N_CONF);
    }

    #[test]
    fn p6_disagree_remap_requires_k_hits_within_window() {
        let mut map = ElevationMap::new(32.0, 0.25);
        for i in 0..(N_SAT as i32) {
            map.integrate_scan(&[pt(1.0, 10.0, 1.0)], i as f64 * 0.01);
        }
        // Two disagreements within the window: must not remap yet.
        map.integrate_scan(&[pt(1.0, 13.0, 1.0)], 10.0);
        map.integrate_scan(&[pt(1.0, 13.0, 1.0)], 10.3);
        let (y, _) = map.get_ground_at(1.0, 1.0).unwrap();
        assert!((y - 10.0).abs() < 1e-6);
        // Third within window completes K=3: remaps.
        map.integrate_scan(&[pt(1.0, 13.0, 1.0)], 10.6);
        let (y, n) = map.get_ground_at(1.0, 1.0).unwrap();
        assert_eq!(y, 13.0);
        assert_eq!(n, 1);
    }

    #[test]
    fn p7_upload_debouncing() {
        let mut map = ElevationMap::new(32.0, 0.25);
        map.integrate_scan(&[pt(0.5, 1.0, 0.5)], 0.0);
        assert_eq!(map.consume_dirty_tiles().len(), 1);

        // A shift within TAU_UPLOAD must not re-dirty the tile.
        map.integrate_scan(&[pt(0.5, 1.02, 0.5)], 1.0);
        assert_eq!(map.consume_dirty_tiles().len(), 0);

        // Enough agree-zone drift to cross TAU_UPLOAD does.
        for i in 0..5 {
            map.integrate_scan(&[pt(0.5, 1.02 + 0.05 * (i as f64 + 1.0), 0.5)], 2.0 + i as f64);
        }
        assert_eq!(map.consume_dirty_tiles().len(), 1);
    }

    #[test]
    fn p8_budget_respected_and_remainder_stays_dirty() {
        let mut map = ElevationMap::new(32.0, 0.25);
        for i in 0..50 {
            map.integrate_scan(&[pt(i as f32 * 40.0 + 1.0, 1.0, 1.0)], i as f64);
        }
        let n = map.get_grid_n_vertices();
        let bytes_per_tile = n * n * 4;
        let first = map.consume_dirty_tiles_budgeted(bytes_per_tile * 3);
        assert_eq!(first.len(), 3);
        let mut remaining = 47;
        loop {
            let batch = map.consume_dirty_tiles_budgeted(bytes_per_tile * 3);
            if batch.is_empty() {
                break;
            }
            remaining -= batch.len();
        }
        assert_eq!(remaining, 0);
    }

    #[test]
    fn p9_adjacent_tile_edge_coincidence() {
        let mut map = ElevationMap::new(32.0, 0.25);
        // A point right at the shared edge between tile (0,0) and (1,0).
        map.integrate_scan(&[pt(31.999, 3.0, 1.0)], 0.0);
        let tiles_before = map.consume_dirty_tiles();
        assert_eq!(tiles_before.len(), 1);
        let n = map.get_grid_n_vertices();
        let t0 = &tiles_before[0];
        assert_eq!(t0.key.tx, 0);
        // Last column of tile (0,0) sits at world x = 32.0, the same
        // world x as column 0 of tile (1,0).
        let edge_val = t0.heights[n - 1];
        assert!((edge_val - 3.0).abs() < 0.5);
    }

    #[test]
    fn p10_ground_query_consistency() {
        let mut map = ElevationMap::new(32.0, 0.25);
        let ys = [4.9, 5.0, 5.05, 4.95, 5.1];
        for (i, y) in ys.iter().enumerate() {
            map.integrate_scan(&[pt(2.0, *y, 2.0)], i as f64);
        }
        let mean: f64 = ys.iter().map(|y| *y as f64).sum::<f64>() / ys.len() as f64;
        let (y, _) = map.get_ground_at(2.0, 2.0).unwrap();
        assert!((y - mean).abs() < TAU_ACCEPT);
    }

    #[test]
    fn non_finite_point_is_rejected_without_effect() {
        let mut map = ElevationMap::new(32.0, 0.25);
        map.integrate_scan(&[pt(f32::NAN, 1.0, 1.0), pt(1.0, 1.0, 1.0)], 0.0);
        assert!(map.get_ground_at(1.0, 1.0).is_some());
        let (n_tiles, _) = map.get_stats();
        assert_eq!(n_tiles, 1);
    }

    #[test]
    fn s1_single_chunk_scan_grid_values() {
        let mut map = ElevationMap::new(32.0, 0.25);
        map.integrate_scan(&[pt(0.0, 0.0, 0.0), pt(1.0, 0.0, 1.0)], 0.0);
        let updates = map.consume_dirty_tiles();
        assert_eq!(updates.len(), 1);
        let n = map.get_grid_n_vertices();
        assert_eq!(updates[0].heights.len(), n * n);
        assert!((updates[0].heights[0]).abs() < 1e-6);
    }

    #[test]
    fn unknown_location_returns_none() {
        let map = ElevationMap::new(32.0, 0.25);
        assert!(map.get_ground_at(100.0, 100.0).is_none());
    }
}
