//! Common Test Utilities for Integration Tests
//!
//! Shared helpers used across integration test modules.

#![allow(dead_code)]

use fastpoints_engine::config::EngineConfig;
use fastpoints_engine::layer::{LayerKind, LayerStyle, LodConfig, PointBatch};
use fastpoints_engine::projection;
use fastpoints_engine::protocol::Event;
use fastpoints_engine::session::MapSession;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// Create a session with default config plus its event receiver
pub fn create_test_session() -> (MapSession, UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MapSession::new(EngineConfig::default(), tx), rx)
}

/// Add a plain point layer with the given cell size and LOD thresholds
pub fn add_points_layer(session: &mut MapSession, layer_id: &str, cell_size: f64, lod: Option<LodConfig>) {
    session
        .add_layer(layer_id, LayerKind::Points, Some(cell_size), LayerStyle::default(), lod)
        .expect("Failed to add test layer");
}

/// `[lon, lat]` that projects onto `(x, y)`
pub fn lonlat_of(x: f64, y: f64) -> [f64; 2] {
    let (lon, lat) = projection::xy_to_lonlat(x, y);
    [lon, lat]
}

/// Batch landing on projected positions, with explicit ids
pub fn projected_batch(points: &[(f64, f64)], ids: &[&str]) -> PointBatch {
    PointBatch {
        coords: points.iter().map(|&(x, y)| lonlat_of(x, y)).collect(),
        ids: Some(ids.iter().map(|s| s.to_string()).collect()),
        colors: None,
        ellipses: None,
    }
}

/// Seeded uniform projected points over `[0, size)^2`
pub fn uniform_points(count: usize, size: f64, seed: u64) -> Vec<(f64, f64)> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| (rng.random_range(0.0..size), rng.random_range(0.0..size)))
        .collect()
}

/// Batch of [`uniform_points`] with auto-generated ids
pub fn uniform_batch(count: usize, size: f64, seed: u64) -> PointBatch {
    PointBatch {
        coords: uniform_points(count, size, seed)
            .into_iter()
            .map(|(x, y)| lonlat_of(x, y))
            .collect(),
        ..Default::default()
    }
}

/// Collect every event currently queued
pub fn drain_events(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Selection events only, as `(layer_id, ids)`
pub fn selection_events(events: &[Event]) -> Vec<(String, Vec<String>)> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Selection { layer_id, ids } => Some((layer_id.clone(), ids.clone())),
            _ => None,
        })
        .collect()
}
