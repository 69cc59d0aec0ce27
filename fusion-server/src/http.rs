//! Health and stats endpoints for external collaborators (ops tooling,
//! dashboards). The renderer itself is out of scope for this crate; these
//! routes exist so something can confirm the pipeline is alive and see
//! how much of the world has been mapped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use fusion_core::{ElevationMap, Receiver};
use serde_json::{json, Value};
use tokio::sync::Mutex;

static STARTUP_MS: AtomicU64 = AtomicU64::new(0);

pub fn mark_startup() {
    let now_ms = now_millis();
    STARTUP_MS.store(now_ms, Ordering::Relaxed);
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Clone)]
pub struct AppState {
    pub elevation: Arc<Mutex<ElevationMap>>,
    pub receiver: Arc<Receiver>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .with_state(state)
}

async fn health() -> Json<Value> {
    let startup = STARTUP_MS.load(Ordering::Relaxed);
    let uptime_secs = if startup > 0 { (now_millis() - startup) / 1000 } else { 0 };
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": uptime_secs,
    }))
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    let map = state.elevation.lock().await;
    let (num_tiles, num_leaves) = map.get_stats();
    Json(json!({
        "numTiles": num_tiles,
        "numLeaves": num_leaves,
        "gridNVertices": map.get_grid_n_vertices(),
        "tileSize": map.get_tile_size(),
    }))
}
