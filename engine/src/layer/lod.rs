//! Tiered level-of-detail candidate planning
//!
//! Rendering asks for the slots to draw in an extent at a given resolution.
//! Small queries are answered exactly, medium ones are thinned by screen
//! spacing, and huge ones sample a bounded number of grid cells before
//! thinning. Selection never goes through here with a resolution, so it
//! always sees the exact result.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::grid::{CellKey, CellRange};
use super::store::PointStore;
use super::types::{Extent, Slot};

/// Thresholds driving tier choice and decimation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LodConfig {
    /// Highest cell count answered exactly
    pub grid_cell_threshold: u64,
    /// Highest cell count scanned in full before thinning
    pub grid_sampling_threshold: u64,
    /// Number of cells sampled past the sampling threshold
    pub grid_sampling_target: u64,
    /// Minimum spacing between kept points, in output pixels
    pub point_decimation_px: f64,
    pub ellipse_decimation_threshold: usize,
    pub ellipse_decimation_target: usize,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            grid_cell_threshold: 1000,
            grid_sampling_threshold: 5000,
            grid_sampling_target: 1000,
            point_decimation_px: 2.5,
            ellipse_decimation_threshold: 5000,
            ellipse_decimation_target: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LodTier {
    Direct,
    Decimated,
    Sampled,
}

impl LodTier {
    pub fn as_str(self) -> &'static str {
        match self {
            LodTier::Direct => "direct",
            LodTier::Decimated => "decimated",
            LodTier::Sampled => "sampled",
        }
    }
}

/// Candidates chosen for one query
#[derive(Debug, Clone, PartialEq)]
pub struct LodPlan {
    pub tier: LodTier,
    pub cells_touched: u64,
    /// Live slots, in grid enumeration order
    pub candidates: Vec<Slot>,
}

/// Exact live slots overlapping `extent`, LOD disabled
pub fn exact(store: &PointStore, extent: &Extent) -> Vec<Slot> {
    store.query_extent(extent)
}

/// Choose a tier for `extent` and produce its candidates.
///
/// A `None` (or unusable) resolution disables LOD entirely.
pub fn plan(
    store: &PointStore,
    extent: &Extent,
    resolution: Option<f64>,
    config: &LodConfig,
) -> LodPlan {
    let Some(range) = store.grid().cell_range(extent) else {
        return LodPlan {
            tier: LodTier::Direct,
            cells_touched: 0,
            candidates: Vec::new(),
        };
    };
    let cells_touched = range.cells_touched();
    let resolution = resolution.filter(|r| r.is_finite() && *r > 0.0);

    let Some(resolution) = resolution else {
        return LodPlan {
            tier: LodTier::Direct,
            cells_touched,
            candidates: store.query_extent(extent),
        };
    };
    let spacing = config.point_decimation_px * resolution;

    if cells_touched <= config.grid_cell_threshold {
        LodPlan {
            tier: LodTier::Direct,
            cells_touched,
            candidates: store.query_extent(extent),
        }
    } else if cells_touched <= config.grid_sampling_threshold {
        LodPlan {
            tier: LodTier::Decimated,
            cells_touched,
            candidates: decimate(store, &store.query_extent(extent), spacing),
        }
    } else {
        let sampled = sample_cells(store, &range, config.grid_sampling_target);
        LodPlan {
            tier: LodTier::Sampled,
            cells_touched,
            candidates: decimate(store, &sampled, spacing),
        }
    }
}

/// Live slots of roughly `target` cells spread evenly across `range`.
///
/// Walks the range with a row-major stride of `ceil(cells / target)`. When
/// the range holds more cells than the grid has occupied ones, the stride is
/// applied to the occupied cells inside the range instead, so sparse data
/// seen from far away is not sampled into emptiness.
fn sample_cells(store: &PointStore, range: &CellRange, target: u64) -> Vec<Slot> {
    let grid = store.grid();
    let target = target.max(1);
    let touched = range.cells_touched();
    let mut out = Vec::new();
    let mut take = |key: CellKey| {
        out.extend(
            grid.bucket(key)
                .iter()
                .copied()
                .filter(|&s| !store.is_deleted(s)),
        );
    };

    if touched > grid.occupied_cells() as u64 {
        let keys: Vec<CellKey> = grid.occupied_keys().filter(|k| range.contains(*k)).collect();
        let stride = (keys.len() as u64).div_ceil(target).max(1) as usize;
        for key in keys.into_iter().step_by(stride) {
            take(key);
        }
    } else {
        let stride = touched.div_ceil(target).max(1);
        let mut k = 0u64;
        while k < touched {
            if let Some(key) = range.nth(k) {
                take(key);
            }
            k = k.saturating_add(stride);
        }
    }
    out
}

/// Thin `candidates` so no two kept points are closer than `spacing`.
///
/// Points are visited in order; each is kept only if no already-kept point
/// lies within `spacing` in the 3x3 neighbourhood of its spacing-sized
/// bucket. The result depends only on the input order, so it is stable for
/// a fixed dataset and resolution.
pub fn decimate(store: &PointStore, candidates: &[Slot], spacing: f64) -> Vec<Slot> {
    if !spacing.is_finite() || spacing <= 0.0 {
        return candidates.to_vec();
    }
    let min_sq = spacing * spacing;
    let mut kept_by_bucket: HashMap<CellKey, Vec<(f64, f64)>> = HashMap::new();
    let mut kept = Vec::new();

    for &slot in candidates {
        let (x, y) = store.position(slot);
        let bx = (x / spacing).floor() as i64;
        let by = (y / spacing).floor() as i64;

        let crowded = (-1..=1).any(|dy| {
            (-1..=1).any(|dx| {
                kept_by_bucket
                    .get(&(bx + dx, by + dy))
                    .is_some_and(|pts| {
                        pts.iter().any(|&(kx, ky)| {
                            let (ddx, ddy) = (kx - x, ky - y);
                            ddx * ddx + ddy * ddy < min_sq
                        })
                    })
            })
        });
        if !crowded {
            kept_by_bucket.entry((bx, by)).or_default().push((x, y));
            kept.push(slot);
        }
    }
    kept
}

/// Keep every `ceil(count / target)`-th ellipse once `count` passes the threshold
pub fn decimate_ellipses(candidates: Vec<Slot>, config: &LodConfig) -> Vec<Slot> {
    if candidates.len() <= config.ellipse_decimation_threshold {
        return candidates;
    }
    let target = config.ellipse_decimation_target.max(1);
    let step = candidates.len().div_ceil(target);
    candidates.into_iter().step_by(step.max(1)).collect()
}
