mod command;
mod config;
mod driver;
mod http;
mod ingest;

use std::sync::Arc;

use fusion_core::{Assembler, ElevationMap, Receiver, StreamKind};
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    http::mark_startup();

    let cfg = ServerConfig::default();
    let endpoints = config::default_endpoints(&cfg.rover_ids);

    let receiver = Arc::new(Receiver::new());
    let assembler = Arc::new(Assembler::default());
    let elevation = Arc::new(Mutex::new(ElevationMap::new(cfg.tile_size, cfg.base_cell_resolution)));

    let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();

    for (&rover_id, ep) in &endpoints {
        tokio::spawn(ingest::run_side_channel(
            receiver.clone(),
            rover_id,
            StreamKind::Pose,
            ep.pose_port,
        ));
        tokio::spawn(ingest::run_side_channel(
            receiver.clone(),
            rover_id,
            StreamKind::Telemetry,
            ep.telemetry_port,
        ));
        tokio::spawn(ingest::run_lidar_channel(
            receiver.clone(),
            rover_id,
            ep.lidar_port,
            chunk_tx.clone(),
        ));
        info!(
            rover_id,
            pose = ep.pose_port,
            lidar = ep.lidar_port,
            telemetry = ep.telemetry_port,
            command = ep.command_port,
            "rover endpoints bound"
        );
    }
    drop(chunk_tx);

    tokio::spawn(driver::run(
        assembler,
        elevation.clone(),
        chunk_rx,
        cfg.tick_period_ms,
        cfg.upload_budget_bytes,
    ));

    let state = http::AppState {
        elevation,
        receiver,
    };
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = http::router(state).layer(cors);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8900".to_string());
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("fusion-server listening on {addr} (health, stats)");
    axum::serve(listener, app).await?;
    Ok(())
}
