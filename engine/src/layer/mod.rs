//! Point layers: storage, grid index, level of detail and selection

pub mod grid;
pub mod lod;
pub mod selection;
pub mod store;
pub mod style;
pub mod types;

pub use grid::{CellKey, CellRange, SpatialGrid};
pub use lod::{LodConfig, LodPlan, LodTier};
pub use selection::SelectionSet;
pub use store::{EllipseBatch, PointBatch, PointStore, SlotEllipse};
pub use style::{EllipseStyle, LayerStyle, PointStyle, Rgba};
pub use types::{Extent, LayerError, LayerKind, Slot};

use std::ops::Range;

/// What a removal changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoveOutcome {
    pub removed: Vec<String>,
    pub selection_changed: bool,
}

/// One point layer and everything it owns
#[derive(Debug, Clone)]
pub struct PointLayer {
    id: String,
    kind: LayerKind,
    store: PointStore,
    selection: SelectionSet,
    style: LayerStyle,
    lod: LodConfig,
    opacity: f32,
    visible: bool,
    selectable: bool,
    revision: u64,
    dirty: bool,
}

impl PointLayer {
    pub fn new(
        id: impl Into<String>,
        kind: LayerKind,
        cell_size: f64,
        style: LayerStyle,
        lod: LodConfig,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            store: PointStore::new(cell_size, kind.has_ellipses()),
            selection: SelectionSet::new(),
            style,
            lod,
            opacity: 1.0,
            visible: true,
            selectable: true,
            revision: 0,
            dirty: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn store(&self) -> &PointStore {
        &self.store
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn style(&self) -> &LayerStyle {
        &self.style
    }

    pub fn lod(&self) -> &LodConfig {
        &self.lod
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_selectable(&self) -> bool {
        self.selectable
    }

    /// Bumped on every change that affects the drawn image
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Return and reset the needs-redraw flag
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Request a redraw without changing the data revision
    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn invalidate(&mut self) {
        self.revision += 1;
        self.dirty = true;
    }

    /// Check a batch against this layer without storing anything
    pub fn validate_points(&self, batch: &PointBatch) -> Result<(), LayerError> {
        self.store.validate(batch)
    }

    pub fn add_points(&mut self, batch: &PointBatch) -> Result<Range<Slot>, LayerError> {
        let range = self.store.append(batch)?;
        if !range.is_empty() {
            self.invalidate();
        }
        Ok(range)
    }

    pub fn remove_ids(&mut self, ids: &[String]) -> RemoveOutcome {
        let removed = self.store.soft_delete(ids);
        let selection_changed = self.selection.remove_many(&removed);
        if !removed.is_empty() {
            self.invalidate();
        }
        RemoveOutcome {
            removed,
            selection_changed,
        }
    }

    /// Returns the ids that matched no live point
    pub fn set_colors(&mut self, ids: &[String], colors: &[u32]) -> Result<Vec<String>, LayerError> {
        let unknown = self.store.set_colors(ids, colors)?;
        if unknown.len() < ids.len() {
            self.invalidate();
        }
        Ok(unknown)
    }

    /// Drop all points and the selection; true if the selection was non-empty
    pub fn clear(&mut self) -> bool {
        let had_points = self.store.len() > 0;
        self.store.clear();
        let selection_changed = self.selection.clear();
        if had_points || selection_changed {
            self.invalidate();
        }
        selection_changed
    }

    /// Non-finite values are ignored; everything else clamps to `[0, 1]`
    pub fn set_opacity(&mut self, opacity: f32) {
        if !opacity.is_finite() {
            return;
        }
        let opacity = opacity.clamp(0.0, 1.0);
        if opacity != self.opacity {
            self.opacity = opacity;
            self.invalidate();
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        if visible != self.visible {
            self.visible = visible;
            self.invalidate();
        }
    }

    pub fn set_selectable(&mut self, selectable: bool) {
        self.selectable = selectable;
    }

    pub fn set_ellipses_visible(&mut self, visible: bool) {
        if visible != self.style.ellipse.ellipses_visible {
            self.style.ellipse.ellipses_visible = visible;
            self.invalidate();
        }
    }

    pub fn set_style(&mut self, style: LayerStyle) {
        if style != self.style {
            self.style = style;
            self.invalidate();
        }
    }

    /// Host-driven replacement of the selection; unknown ids are dropped
    pub fn select_set(&mut self, ids: &[String]) -> bool {
        let changed = self.selection.set_selection(&self.store, ids.iter().cloned());
        if changed {
            self.invalidate();
        }
        changed
    }

    /// Nearest live point within `radius` of `(x, y)`, if the layer is pickable
    pub fn pick(&self, x: f64, y: f64, radius: f64) -> Option<&str> {
        if !self.selectable {
            return None;
        }
        selection::pick_nearest(&self.store, x, y, radius).map(|slot| self.store.id(slot))
    }

    /// Replace the selection with every live point inside `extent`
    pub fn box_select(&mut self, extent: &Extent) -> bool {
        if !self.selectable {
            return false;
        }
        let ids = selection::box_select(&self.store, extent);
        let changed = self.selection.set_selection(&self.store, ids);
        if changed {
            self.invalidate();
        }
        changed
    }

    pub fn toggle_one(&mut self, id: &str) -> bool {
        if !self.selectable {
            return false;
        }
        let changed = self.selection.toggle_one(&self.store, id);
        if changed {
            self.invalidate();
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::projected_batch;

    fn layer_with_points() -> PointLayer {
        let mut layer = PointLayer::new(
            "pts",
            LayerKind::Points,
            10.0,
            LayerStyle::default(),
            LodConfig::default(),
        );
        layer
            .add_points(&projected_batch(
                &[(0.0, 0.0), (5.0, 5.0), (1000.0, 1000.0)],
                Some(&["a", "b", "c"]),
            ))
            .unwrap();
        layer
    }

    #[test]
    fn test_mutations_bump_revision() {
        let mut layer = layer_with_points();
        assert!(layer.take_dirty());
        assert!(!layer.take_dirty());
        let rev = layer.revision();
        layer.set_opacity(0.5);
        assert!(layer.revision() > rev);
        assert!(layer.take_dirty());
    }

    #[test]
    fn test_opacity_is_clamped() {
        let mut layer = layer_with_points();
        layer.set_opacity(3.0);
        assert_eq!(layer.opacity(), 1.0);
        layer.set_opacity(-1.0);
        assert_eq!(layer.opacity(), 0.0);
        layer.set_opacity(f32::NAN);
        assert_eq!(layer.opacity(), 0.0);
    }

    #[test]
    fn test_remove_drops_selected_ids() {
        let mut layer = layer_with_points();
        layer.select_set(&["a".to_string(), "b".to_string()]);
        let outcome = layer.remove_ids(&["a".to_string()]);
        assert_eq!(outcome.removed, vec!["a".to_string()]);
        assert!(outcome.selection_changed);
        assert_eq!(layer.selection().to_vec(), vec!["b".to_string()]);
    }

    #[test]
    fn test_pick_and_toggle() {
        let mut layer = layer_with_points();
        assert_eq!(layer.pick(0.0, 0.0, 1.0), Some("a"));
        assert_eq!(layer.pick(500.0, 500.0, 1.0), None);
        assert!(layer.toggle_one("b"));
        assert!(layer.toggle_one("a"));
        assert_eq!(layer.selection().len(), 2);
        assert!(layer.toggle_one("b"));
        assert_eq!(layer.selection().to_vec(), vec!["a".to_string()]);
    }

    #[test]
    fn test_unselectable_layer_ignores_interaction() {
        let mut layer = layer_with_points();
        layer.set_selectable(false);
        assert_eq!(layer.pick(0.0, 0.0, 1.0), None);
        assert!(!layer.toggle_one("a"));
        assert!(!layer.box_select(&Extent::new(-1.0, -1.0, 6.0, 6.0)));
        assert!(layer.selection().is_empty());
    }

    #[test]
    fn test_clear_twice_is_harmless() {
        let mut layer = layer_with_points();
        layer.select_set(&["c".to_string()]);
        assert!(layer.clear());
        let rev = layer.revision();
        assert!(!layer.clear());
        assert_eq!(layer.revision(), rev);
        assert_eq!(layer.store().len(), 0);
    }
}
