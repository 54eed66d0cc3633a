//! Structure-of-arrays point storage with soft deletion
//!
//! Slots are dense and append-only. Deleting a point only sets its tombstone;
//! the slot index is never reused, which keeps every grid bucket valid without
//! re-indexing. Any future compaction must rebuild the grid from scratch.

use std::collections::HashSet;
use std::ops::Range;

use indexmap::IndexMap;

use super::grid::SpatialGrid;
use super::style::Rgba;
use super::types::{Extent, LayerError, Slot};
use crate::projection;

/// One ingestion batch in geographic coordinates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointBatch {
    /// `[lon, lat]` pairs in degrees
    pub coords: Vec<[f64; 2]>,
    pub ids: Option<Vec<String>>,
    /// Packed `0xRRGGBBAA` overrides
    pub colors: Option<Vec<u32>>,
    pub ellipses: Option<EllipseBatch>,
}

/// Real-world ellipse parameters, parallel to [`PointBatch::coords`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EllipseBatch {
    pub semi_major_m: Vec<f64>,
    pub semi_minor_m: Vec<f64>,
    /// Bearing of the major axis, degrees clockwise from true north
    pub tilt_deg: Vec<f64>,
}

/// Ellipse of one slot in projected units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotEllipse {
    pub semi_major: f64,
    pub semi_minor: f64,
    /// Radians counter-clockwise from the projected +X axis
    pub rotation: f64,
}

#[derive(Debug, Clone, Default)]
struct EllipseColumns {
    semi_major: Vec<f64>,
    semi_minor: Vec<f64>,
    rotation: Vec<f64>,
}

/// Parallel per-slot arrays plus the grid index over them
#[derive(Debug, Clone)]
pub struct PointStore {
    xs: Vec<f64>,
    ys: Vec<f64>,
    ids: Vec<String>,
    colors: Vec<Option<Rgba>>,
    deleted: Vec<bool>,
    ellipses: Option<EllipseColumns>,
    /// Live slots only
    slots_by_id: IndexMap<String, Slot>,
    live: usize,
    max_semi_major: f64,
    grid: SpatialGrid,
}

impl PointStore {
    pub fn new(cell_size: f64, with_ellipses: bool) -> Self {
        Self {
            xs: Vec::new(),
            ys: Vec::new(),
            ids: Vec::new(),
            colors: Vec::new(),
            deleted: Vec::new(),
            ellipses: with_ellipses.then(EllipseColumns::default),
            slots_by_id: IndexMap::new(),
            live: 0,
            max_semi_major: 0.0,
            grid: SpatialGrid::new(cell_size),
        }
    }

    /// Allocated slots, tombstoned ones included
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    pub fn has_ellipses(&self) -> bool {
        self.ellipses.is_some()
    }

    /// Largest projected semi-major axis ever stored
    pub fn max_semi_major(&self) -> f64 {
        self.max_semi_major
    }

    /// Projected position of `slot`.
    ///
    /// # Panics
    ///
    /// Panics if `slot` was not allocated by this store. The same holds for
    /// [`id`](Self::id), [`color`](Self::color), [`is_deleted`](Self::is_deleted)
    /// and [`ellipse`](Self::ellipse).
    pub fn position(&self, slot: Slot) -> (f64, f64) {
        let i = slot as usize;
        (self.xs[i], self.ys[i])
    }

    pub fn id(&self, slot: Slot) -> &str {
        &self.ids[slot as usize]
    }

    pub fn color(&self, slot: Slot) -> Option<Rgba> {
        self.colors[slot as usize]
    }

    pub fn is_deleted(&self, slot: Slot) -> bool {
        self.deleted[slot as usize]
    }

    pub fn ellipse(&self, slot: Slot) -> Option<SlotEllipse> {
        let columns = self.ellipses.as_ref()?;
        let i = slot as usize;
        Some(SlotEllipse {
            semi_major: columns.semi_major[i],
            semi_minor: columns.semi_minor[i],
            rotation: columns.rotation[i],
        })
    }

    /// Live slot currently carrying `id`
    pub fn slot_of(&self, id: &str) -> Option<Slot> {
        self.slots_by_id.get(id).copied()
    }

    /// Project and append a batch, indexing every new slot.
    ///
    /// The whole batch is validated first; on error nothing is stored.
    pub fn append(&mut self, batch: &PointBatch) -> Result<Range<Slot>, LayerError> {
        let n = batch.coords.len();
        self.validate(batch)?;

        let start = self.len() as Slot;
        self.xs.reserve(n);
        self.ys.reserve(n);
        self.ids.reserve(n);
        self.colors.reserve(n);
        self.deleted.reserve(n);

        for (i, &[lon, lat]) in batch.coords.iter().enumerate() {
            let slot = start + i as Slot;
            let (x, y) = projection::lonlat_to_xy(lon, lat);
            let id = match &batch.ids {
                Some(ids) => ids[i].clone(),
                None => auto_id(slot),
            };

            self.xs.push(x);
            self.ys.push(y);
            self.colors
                .push(batch.colors.as_ref().map(|c| Rgba::from_packed(c[i])));
            self.deleted.push(false);
            self.slots_by_id.insert(id.clone(), slot);
            self.ids.push(id);

            if let Some(columns) = self.ellipses.as_mut() {
                // Scale at the latitude the point was actually projected at
                let lat = lat.clamp(-projection::MAX_MERCATOR_LAT, projection::MAX_MERCATOR_LAT);
                let (a, b, rot) = match &batch.ellipses {
                    Some(e) => (
                        projection::meters_to_plane(e.semi_major_m[i], lat),
                        projection::meters_to_plane(e.semi_minor_m[i], lat),
                        projection::bearing_to_rotation(e.tilt_deg[i]),
                    ),
                    None => (0.0, 0.0, 0.0),
                };
                columns.semi_major.push(a);
                columns.semi_minor.push(b);
                columns.rotation.push(rot);
                self.max_semi_major = self.max_semi_major.max(a).max(b);
            }

            self.grid.insert(slot, x, y);
        }
        self.live += n;

        Ok(start..start + n as Slot)
    }

    /// Everything [`append`](Self::append) checks before storing a batch
    pub fn validate(&self, batch: &PointBatch) -> Result<(), LayerError> {
        let n = batch.coords.len();
        let first = self.len();
        if let Some(ids) = &batch.ids
            && ids.len() != n
        {
            return Err(mismatch("ids", ids.len(), n));
        }
        if let Some(colors) = &batch.colors
            && colors.len() != n
        {
            return Err(mismatch("colors", colors.len(), n));
        }
        match (&batch.ellipses, self.has_ellipses()) {
            (Some(_), false) => {
                return Err(LayerError::Validation(
                    "layer does not carry ellipses".to_string(),
                ));
            }
            (Some(e), true) => {
                for (name, len) in [
                    ("semi_major_m", e.semi_major_m.len()),
                    ("semi_minor_m", e.semi_minor_m.len()),
                    ("tilt_deg", e.tilt_deg.len()),
                ] {
                    if len != n {
                        return Err(mismatch(name, len, n));
                    }
                }
            }
            _ => {}
        }
        if first + n > Slot::MAX as usize {
            return Err(LayerError::Validation(format!(
                "layer slot space exhausted ({} + {} points)",
                first, n
            )));
        }
        if let Some(i) = batch
            .coords
            .iter()
            .position(|[lon, lat]| !lon.is_finite() || !lat.is_finite())
        {
            return Err(LayerError::Validation(format!(
                "coordinate {} is not finite",
                i
            )));
        }

        let mut seen: HashSet<&str> = HashSet::with_capacity(n);
        let generated: Vec<String>;
        let ids: &[String] = match &batch.ids {
            Some(ids) => ids,
            None => {
                generated = (0..n).map(|i| auto_id((first + i) as Slot)).collect();
                &generated
            }
        };
        for id in ids {
            if self.slots_by_id.contains_key(id) || !seen.insert(id.as_str()) {
                return Err(LayerError::Validation(format!("duplicate id: {}", id)));
            }
        }
        Ok(())
    }

    /// Tombstone the live slots carrying `ids`, returning the ids removed
    pub fn soft_delete(&mut self, ids: &[String]) -> Vec<String> {
        let mut removed = Vec::new();
        for id in ids {
            if let Some(slot) = self.slots_by_id.swap_remove(id) {
                self.deleted[slot as usize] = true;
                self.live -= 1;
                removed.push(id.clone());
            }
        }
        removed
    }

    /// Overwrite color overrides of live slots; returns the ids not found
    pub fn set_colors(&mut self, ids: &[String], colors: &[u32]) -> Result<Vec<String>, LayerError> {
        if ids.len() != colors.len() {
            return Err(mismatch("colors", colors.len(), ids.len()));
        }
        let mut unknown = Vec::new();
        for (id, &packed) in ids.iter().zip(colors) {
            match self.slots_by_id.get(id) {
                Some(&slot) => self.colors[slot as usize] = Some(Rgba::from_packed(packed)),
                None => unknown.push(id.clone()),
            }
        }
        Ok(unknown)
    }

    /// Drop every slot and the whole grid
    pub fn clear(&mut self) {
        self.xs.clear();
        self.ys.clear();
        self.ids.clear();
        self.colors.clear();
        self.deleted.clear();
        if let Some(columns) = self.ellipses.as_mut() {
            columns.semi_major.clear();
            columns.semi_minor.clear();
            columns.rotation.clear();
        }
        self.slots_by_id.clear();
        self.live = 0;
        self.max_semi_major = 0.0;
        self.grid.clear();
    }

    /// Live slots in every cell overlapping `extent` (exact, no LOD)
    pub fn query_extent(&self, extent: &Extent) -> Vec<Slot> {
        let mut out = Vec::new();
        if let Some(range) = self.grid.cell_range(extent) {
            self.grid.for_each_bucket(&range, |bucket| {
                out.extend(bucket.iter().copied().filter(|&s| !self.deleted[s as usize]));
            });
        }
        out
    }
}

fn auto_id(slot: Slot) -> String {
    format!("pt{}", slot)
}

fn mismatch(name: &str, got: usize, expected: usize) -> LayerError {
    LayerError::Validation(format!(
        "{} has {} entries, expected {}",
        name, got, expected
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::lonlat_batch;

    #[test]
    fn test_append_keeps_columns_parallel() {
        let mut store = PointStore::new(10.0, false);
        let range = store
            .append(&lonlat_batch(&[(0.0, 0.0), (5.0, 5.0)], Some(&["a", "b"])))
            .expect("append should succeed");
        assert_eq!(range, 0..2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.live_count(), 2);
        assert_eq!(store.id(1), "b");
        assert_eq!(store.slot_of("a"), Some(0));
    }

    #[test]
    fn test_mismatched_ids_reject_whole_batch() {
        let mut store = PointStore::new(10.0, false);
        let mut batch = lonlat_batch(&[(0.0, 0.0), (1.0, 1.0)], None);
        batch.ids = Some(vec!["only-one".to_string()]);
        let err = store.append(&batch).expect_err("length mismatch");
        assert!(matches!(err, LayerError::Validation(_)));
        assert_eq!(store.len(), 0);
        assert_eq!(store.grid().occupied_cells(), 0);
    }

    #[test]
    fn test_duplicate_live_id_is_rejected() {
        let mut store = PointStore::new(10.0, false);
        store
            .append(&lonlat_batch(&[(0.0, 0.0)], Some(&["a"])))
            .unwrap();
        let err = store
            .append(&lonlat_batch(&[(1.0, 1.0)], Some(&["a"])))
            .expect_err("duplicate id");
        assert!(matches!(err, LayerError::Validation(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_tombstoned_id_can_be_reused() {
        let mut store = PointStore::new(10.0, false);
        store
            .append(&lonlat_batch(&[(0.0, 0.0)], Some(&["a"])))
            .unwrap();
        store.soft_delete(&["a".to_string()]);
        store
            .append(&lonlat_batch(&[(1.0, 1.0)], Some(&["a"])))
            .expect("reuse after tombstone");
        assert_eq!(store.slot_of("a"), Some(1));
        assert!(store.is_deleted(0));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_soft_delete_is_idempotent() {
        let mut store = PointStore::new(10.0, false);
        store
            .append(&lonlat_batch(&[(0.0, 0.0), (1.0, 1.0)], Some(&["a", "b"])))
            .unwrap();
        assert_eq!(store.soft_delete(&["a".to_string()]), vec!["a".to_string()]);
        assert!(store.soft_delete(&["a".to_string()]).is_empty());
        assert!(store.soft_delete(&["nope".to_string()]).is_empty());
        assert_eq!(store.live_count(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_query_skips_tombstones() {
        let mut store = PointStore::new(10.0, false);
        // 1e-5 degrees is roughly one meter from the origin
        store
            .append(&lonlat_batch(&[(0.0, 0.0), (1.0e-5, 1.0e-5)], Some(&["a", "b"])))
            .unwrap();
        store.soft_delete(&["a".to_string()]);
        let found = store.query_extent(&Extent::new(-5.0, -5.0, 5.0, 5.0));
        assert_eq!(found, vec![1]);
    }

    #[test]
    fn test_set_colors_reports_unknown_ids() {
        let mut store = PointStore::new(10.0, false);
        store
            .append(&lonlat_batch(&[(0.0, 0.0)], Some(&["a"])))
            .unwrap();
        let unknown = store
            .set_colors(&["a".to_string(), "zz".to_string()], &[0x0000_ffff, 0xffff_ffff])
            .unwrap();
        assert_eq!(unknown, vec!["zz".to_string()]);
        assert_eq!(store.color(0), Some(Rgba::new(0, 0, 255, 255)));
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut store = PointStore::new(10.0, false);
        store
            .append(&lonlat_batch(&[(0.0, 0.0)], Some(&["a"])))
            .unwrap();
        store.clear();
        store.clear();
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
        assert_eq!(store.grid().occupied_cells(), 0);
        assert_eq!(store.slot_of("a"), None);
    }

    #[test]
    fn test_ellipse_batch_on_plain_store_is_rejected() {
        let mut store = PointStore::new(10.0, false);
        let mut batch = lonlat_batch(&[(0.0, 0.0)], None);
        batch.ellipses = Some(EllipseBatch {
            semi_major_m: vec![10.0],
            semi_minor_m: vec![5.0],
            tilt_deg: vec![0.0],
        });
        assert!(store.append(&batch).is_err());
    }

    #[test]
    fn test_ellipse_axes_are_secant_corrected() {
        let mut store = PointStore::new(1000.0, true);
        let batch = PointBatch {
            coords: vec![[10.0, 60.0]],
            ids: Some(vec!["e".to_string()]),
            colors: None,
            ellipses: Some(EllipseBatch {
                semi_major_m: vec![1000.0],
                semi_minor_m: vec![-3.0],
                tilt_deg: vec![90.0],
            }),
        };
        store.append(&batch).unwrap();
        let e = store.ellipse(0).expect("geo store has ellipses");
        assert!((e.semi_major - 2000.0).abs() < 1e-6);
        assert_eq!(e.semi_minor, 0.0);
        assert!(e.rotation.abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_coordinate_is_rejected() {
        let mut store = PointStore::new(10.0, false);
        let batch = PointBatch {
            coords: vec![[0.0, 0.0], [f64::NAN, 1.0]],
            ..Default::default()
        };
        assert!(store.append(&batch).is_err());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_auto_ids_follow_slots() {
        let mut store = PointStore::new(10.0, false);
        store.append(&lonlat_batch(&[(0.0, 0.0)], None)).unwrap();
        store.append(&lonlat_batch(&[(1.0, 1.0)], None)).unwrap();
        assert_eq!(store.id(0), "pt0");
        assert_eq!(store.id(1), "pt1");
    }

    #[test]
    fn test_polar_ellipse_scales_at_clamped_latitude() {
        let mut store = PointStore::new(10.0, true);
        let batch = PointBatch {
            coords: vec![[0.0, 89.9]],
            ellipses: Some(EllipseBatch {
                semi_major_m: vec![1000.0],
                semi_minor_m: vec![500.0],
                tilt_deg: vec![0.0],
            }),
            ..Default::default()
        };
        store.append(&batch).unwrap();
        let e = store.ellipse(0).expect("geo store keeps ellipses");
        let expected = projection::meters_to_plane(1000.0, projection::MAX_MERCATOR_LAT);
        assert!((e.semi_major - expected).abs() < 1e-6);
        assert!(e.semi_major < 20_000.0, "semi-major {}", e.semi_major);
    }

    #[test]
    fn test_validate_leaves_store_untouched() {
        let mut store = PointStore::new(10.0, false);
        store
            .append(&lonlat_batch(&[(0.0, 0.0)], Some(&["a"])))
            .unwrap();
        let err = store
            .validate(&lonlat_batch(&[(1.0, 1.0), (2.0, 2.0)], Some(&["b", "a"])))
            .expect_err("a is live");
        assert_eq!(err, LayerError::Validation("duplicate id: a".to_string()));
        assert!(store.validate(&lonlat_batch(&[(1.0, 1.0)], Some(&["b"]))).is_ok());
        assert_eq!(store.len(), 1);
    }

    #[test]
    #[should_panic]
    fn test_unallocated_slot_panics() {
        let store = PointStore::new(10.0, false);
        store.position(0);
    }
}
