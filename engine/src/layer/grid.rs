//! Uniform grid index over the projected plane
//!
//! Each point slot is appended to the bucket of the cell containing it.
//! Buckets are never pruned on deletion: tombstones in the store exclude
//! dead slots, so deletes stay O(1) at the cost of slightly longer scans.

use indexmap::IndexMap;
use tracing::warn;

use super::types::{Extent, Slot};

/// Smallest accepted cell edge, in projected units
pub const MIN_CELL_SIZE: f64 = 1.0e-6;

/// Integer cell coordinates `(floor(x / size), floor(y / size))`
pub type CellKey = (i64, i64);

/// Inclusive rectangle of cell coordinates covered by an extent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub min_cx: i64,
    pub min_cy: i64,
    pub max_cx: i64,
    pub max_cy: i64,
}

impl CellRange {
    /// Number of columns, saturating at `u64::MAX`
    pub fn columns(&self) -> u64 {
        span(self.min_cx, self.max_cx)
    }

    pub fn rows(&self) -> u64 {
        span(self.min_cy, self.max_cy)
    }

    /// `(maxCellX - minCellX + 1) * (maxCellY - minCellY + 1)`, saturating
    pub fn cells_touched(&self) -> u64 {
        self.columns().saturating_mul(self.rows())
    }

    pub fn contains(&self, key: CellKey) -> bool {
        key.0 >= self.min_cx && key.0 <= self.max_cx && key.1 >= self.min_cy && key.1 <= self.max_cy
    }

    /// Key of the `k`-th cell in row-major order, if inside the range
    pub fn nth(&self, k: u64) -> Option<CellKey> {
        let columns = self.columns();
        if columns == 0 || k >= self.cells_touched() {
            return None;
        }
        let cx = i128::from(self.min_cx) + i128::from(k % columns);
        let cy = i128::from(self.min_cy) + i128::from(k / columns);
        Some((i64::try_from(cx).ok()?, i64::try_from(cy).ok()?))
    }
}

fn span(min: i64, max: i64) -> u64 {
    let width = i128::from(max) - i128::from(min) + 1;
    u64::try_from(width.max(0)).unwrap_or(u64::MAX)
}

/// Spatial hash of slots keyed by grid cell
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    cell_size: f64,
    cells: IndexMap<CellKey, Vec<Slot>>,
}

impl SpatialGrid {
    /// Create an empty grid; degenerate cell sizes clamp to [`MIN_CELL_SIZE`]
    pub fn new(cell_size: f64) -> Self {
        let clamped = if cell_size.is_finite() {
            cell_size.max(MIN_CELL_SIZE)
        } else {
            MIN_CELL_SIZE
        };
        if clamped != cell_size {
            warn!("Grid cell size {} is degenerate, clamped to {}", cell_size, clamped);
        }
        Self {
            cell_size: clamped,
            cells: IndexMap::new(),
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Number of non-empty cells
    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }

    /// Keys of non-empty cells in first-insertion order
    pub fn occupied_keys(&self) -> impl Iterator<Item = CellKey> + '_ {
        self.cells.keys().copied()
    }

    pub fn cell_of(&self, x: f64, y: f64) -> CellKey {
        (
            (x / self.cell_size).floor() as i64,
            (y / self.cell_size).floor() as i64,
        )
    }

    /// Append `slot`, located at `(x, y)`, to its cell bucket
    pub fn insert(&mut self, slot: Slot, x: f64, y: f64) {
        let key = self.cell_of(x, y);
        self.cells.entry(key).or_default().push(slot);
    }

    /// Slots bucketed in `key`, including tombstoned ones
    pub fn bucket(&self, key: CellKey) -> &[Slot] {
        self.cells.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Cells overlapping `extent`, partially overlapping cells included
    pub fn cell_range(&self, extent: &Extent) -> Option<CellRange> {
        if !extent.is_finite() {
            return None;
        }
        let (min_cx, min_cy) = self.cell_of(extent.min_x, extent.min_y);
        let (max_cx, max_cy) = self.cell_of(extent.max_x, extent.max_y);
        Some(CellRange {
            min_cx,
            min_cy,
            max_cx,
            max_cy,
        })
    }

    /// Visit every bucket whose cell lies in `range`.
    ///
    /// Walks the range row by row, or the occupied cells when the range is
    /// larger than the set of non-empty cells.
    pub fn for_each_bucket(&self, range: &CellRange, mut visit: impl FnMut(&[Slot])) {
        let touched = range.cells_touched();
        if touched > self.cells.len() as u64 {
            for (key, bucket) in &self.cells {
                if range.contains(*key) {
                    visit(bucket);
                }
            }
            return;
        }
        for cy in range.min_cy..=range.max_cy {
            for cx in range.min_cx..=range.max_cx {
                if let Some(bucket) = self.cells.get(&(cx, cy)) {
                    visit(bucket);
                }
            }
        }
    }

    /// Concatenated bucket contents of every cell overlapping `extent`
    pub fn query_extent(&self, extent: &Extent) -> Vec<Slot> {
        let mut out = Vec::new();
        if let Some(range) = self.cell_range(extent) {
            self.for_each_bucket(&range, |bucket| out.extend_from_slice(bucket));
        }
        out
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_of_floors_negative_coordinates() {
        let grid = SpatialGrid::new(10.0);
        assert_eq!(grid.cell_of(0.0, 0.0), (0, 0));
        assert_eq!(grid.cell_of(9.99, 10.0), (0, 1));
        assert_eq!(grid.cell_of(-0.1, -10.0), (-1, -1));
    }

    #[test]
    fn test_query_includes_partially_overlapping_cells() {
        let mut grid = SpatialGrid::new(10.0);
        grid.insert(0, 0.0, 0.0);
        grid.insert(1, 5.0, 5.0);
        grid.insert(2, 1000.0, 1000.0);
        grid.insert(3, 9.0, 9.0);

        let found = grid.query_extent(&Extent::new(-1.0, -1.0, 6.0, 6.0));
        // (9, 9) shares the cell with (5, 5), so it is a candidate too
        assert_eq!(found, vec![0, 1, 3]);
    }

    #[test]
    fn test_degenerate_cell_size_is_clamped() {
        assert_eq!(SpatialGrid::new(0.0).cell_size(), MIN_CELL_SIZE);
        assert_eq!(SpatialGrid::new(-5.0).cell_size(), MIN_CELL_SIZE);
        assert_eq!(SpatialGrid::new(f64::NAN).cell_size(), MIN_CELL_SIZE);
    }

    #[test]
    fn test_cells_touched_counts_inclusive_range() {
        let grid = SpatialGrid::new(100.0);
        let range = grid
            .cell_range(&Extent::new(0.0, 0.0, 10_000.0, 10_000.0))
            .expect("finite extent");
        assert_eq!(range.cells_touched(), 101 * 101);
    }

    #[test]
    fn test_huge_range_walks_occupied_cells() {
        let mut grid = SpatialGrid::new(1.0);
        grid.insert(7, 3.5, -2.5);
        let found = grid.query_extent(&Extent::new(-1.0e9, -1.0e9, 1.0e9, 1.0e9));
        assert_eq!(found, vec![7]);
    }

    #[test]
    fn test_non_finite_extent_returns_nothing() {
        let mut grid = SpatialGrid::new(1.0);
        grid.insert(0, 0.0, 0.0);
        let extent = Extent {
            min_x: f64::NAN,
            min_y: 0.0,
            max_x: 1.0,
            max_y: 1.0,
        };
        assert!(grid.query_extent(&extent).is_empty());
    }

    #[test]
    fn test_nth_walks_row_major() {
        let range = CellRange {
            min_cx: 2,
            min_cy: 5,
            max_cx: 4,
            max_cy: 6,
        };
        assert_eq!(range.nth(0), Some((2, 5)));
        assert_eq!(range.nth(2), Some((4, 5)));
        assert_eq!(range.nth(3), Some((2, 6)));
        assert_eq!(range.nth(6), None);
    }
}
