//! Test Utilities Module
//!
//! Fixtures shared by the unit tests. This module is only compiled when
//! running tests.

#![cfg(test)]

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::config::EngineConfig;
use crate::layer::{EllipseBatch, PointBatch, PointStore};
use crate::projection;
use crate::protocol::Event;
use crate::session::MapSession;

// ============================================================================
// Batches
// ============================================================================

fn owned_ids(ids: Option<&[&str]>) -> Option<Vec<String>> {
    ids.map(|ids| ids.iter().map(|s| s.to_string()).collect())
}

/// Batch from `(lon, lat)` degrees
pub fn lonlat_batch(points: &[(f64, f64)], ids: Option<&[&str]>) -> PointBatch {
    PointBatch {
        coords: points.iter().map(|&(lon, lat)| [lon, lat]).collect(),
        ids: owned_ids(ids),
        colors: None,
        ellipses: None,
    }
}

/// Batch that lands on the given projected `(x, y)` positions
pub fn projected_batch(points: &[(f64, f64)], ids: Option<&[&str]>) -> PointBatch {
    PointBatch {
        coords: points
            .iter()
            .map(|&(x, y)| {
                let (lon, lat) = projection::xy_to_lonlat(x, y);
                [lon, lat]
            })
            .collect(),
        ids: owned_ids(ids),
        colors: None,
        ellipses: None,
    }
}

/// Ellipses as `(x, y, semi_major_m, semi_minor_m, tilt_deg)` near the
/// equator, where meters and projected units coincide. Ids are `e0`, `e1`, ...
pub fn geo_batch(ellipses: &[(f64, f64, f64, f64, f64)]) -> PointBatch {
    let points: Vec<(f64, f64)> = ellipses.iter().map(|e| (e.0, e.1)).collect();
    let ids: Vec<String> = (0..ellipses.len()).map(|i| format!("e{}", i)).collect();
    let mut batch = projected_batch(&points, None);
    batch.ids = Some(ids);
    batch.ellipses = Some(EllipseBatch {
        semi_major_m: ellipses.iter().map(|e| e.2).collect(),
        semi_minor_m: ellipses.iter().map(|e| e.3).collect(),
        tilt_deg: ellipses.iter().map(|e| e.4).collect(),
    });
    batch
}

/// Seeded uniform points over `[0, size)^2` in projected units
pub fn uniform_points(count: usize, size: f64, seed: u64) -> Vec<(f64, f64)> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| (rng.random_range(0.0..size), rng.random_range(0.0..size)))
        .collect()
}

/// Plain store filled with [`uniform_points`]
pub fn uniform_store(count: usize, size: f64, cell_size: f64, seed: u64) -> PointStore {
    let mut store = PointStore::new(cell_size, false);
    store
        .append(&projected_batch(&uniform_points(count, size, seed), None))
        .expect("uniform batch should be valid");
    store
}

// ============================================================================
// Sessions
// ============================================================================

/// Session with default config and its event receiver
pub fn test_session() -> (MapSession, UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MapSession::new(EngineConfig::default(), tx), rx)
}

/// Every event currently queued
pub fn drain(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
