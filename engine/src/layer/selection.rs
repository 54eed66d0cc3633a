//! Exact hit-testing and the per-layer selected-id set
//!
//! Every query here goes straight to the grid without level-of-detail, so
//! what the user can pick never depends on what was drawn.

use indexmap::IndexSet;

use super::lod;
use super::store::PointStore;
use super::types::{Extent, Slot};

/// Live slot nearest to `(x, y)` within `radius`, projected units.
///
/// Ties keep the first candidate in grid enumeration order.
pub fn pick_nearest(store: &PointStore, x: f64, y: f64, radius: f64) -> Option<Slot> {
    if !x.is_finite() || !y.is_finite() || !radius.is_finite() || radius < 0.0 {
        return None;
    }
    let max_sq = radius * radius;
    let mut best: Option<(Slot, f64)> = None;
    for slot in lod::exact(store, &Extent::around(x, y, radius)) {
        let (px, py) = store.position(slot);
        let d_sq = (px - x) * (px - x) + (py - y) * (py - y);
        if d_sq > max_sq {
            continue;
        }
        if best.is_none_or(|(_, best_sq)| d_sq < best_sq) {
            best = Some((slot, d_sq));
        }
    }
    best.map(|(slot, _)| slot)
}

/// Ids of live points inside `extent`, bounds inclusive
pub fn box_select(store: &PointStore, extent: &Extent) -> Vec<String> {
    lod::exact(store, extent)
        .into_iter()
        .filter(|&slot| {
            let (x, y) = store.position(slot);
            extent.contains(x, y)
        })
        .map(|slot| store.id(slot).to_string())
        .collect()
}

/// Selected external ids of one layer, in selection order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionSet {
    ids: IndexSet<String>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.ids.iter().cloned().collect()
    }

    /// Drop ids whose points were deleted since the last mutation
    fn prune(&mut self, store: &PointStore) -> bool {
        let before = self.ids.len();
        self.ids.retain(|id| store.slot_of(id).is_some());
        before != self.ids.len()
    }

    /// Replace the set with the live ids among `ids`; true if it changed
    pub fn set_selection<I, S>(&mut self, store: &PointStore, ids: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let next: IndexSet<String> = ids
            .into_iter()
            .map(Into::into)
            .filter(|id| store.slot_of(id).is_some())
            .collect();
        self.prune(store);
        let changed = !same_members(&self.ids, &next);
        self.ids = next;
        changed
    }

    /// Add `id` if absent, remove it if present. Unknown ids are ignored.
    pub fn toggle_one(&mut self, store: &PointStore, id: &str) -> bool {
        let pruned = self.prune(store);
        if self.ids.shift_remove(id) {
            return true;
        }
        if store.slot_of(id).is_some() {
            self.ids.insert(id.to_string());
            return true;
        }
        pruned
    }

    /// Forget `ids` outright, e.g. after they were deleted
    pub fn remove_many(&mut self, ids: &[String]) -> bool {
        let before = self.ids.len();
        for id in ids {
            self.ids.shift_remove(id);
        }
        before != self.ids.len()
    }

    pub fn clear(&mut self) -> bool {
        let changed = !self.ids.is_empty();
        self.ids.clear();
        changed
    }
}

fn same_members(a: &IndexSet<String>, b: &IndexSet<String>) -> bool {
    a.len() == b.len() && a.iter().all(|id| b.contains(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::projected_batch;

    fn three_points() -> PointStore {
        let mut store = PointStore::new(10.0, false);
        store
            .append(&projected_batch(
                &[(0.0, 0.0), (5.0, 5.0), (1000.0, 1000.0)],
                Some(&["a", "b", "c"]),
            ))
            .unwrap();
        store
    }

    #[test]
    fn test_pick_nearest_within_radius() {
        let store = three_points();
        let hit = pick_nearest(&store, 0.0, 0.0, 1.0).expect("origin point is in range");
        assert_eq!(store.id(hit), "a");
        assert_eq!(pick_nearest(&store, 100.0, 100.0, 1.0), None);
    }

    #[test]
    fn test_pick_prefers_closest() {
        let store = three_points();
        let hit = pick_nearest(&store, 4.0, 4.0, 10.0).unwrap();
        assert_eq!(store.id(hit), "b");
    }

    #[test]
    fn test_pick_ignores_tombstones() {
        let mut store = three_points();
        store.soft_delete(&["a".to_string()]);
        assert_eq!(pick_nearest(&store, 0.0, 0.0, 1.0), None);
    }

    #[test]
    fn test_box_select_is_inclusive() {
        let store = three_points();
        let ids = box_select(&store, &Extent::new(-1.0, -1.0, 5.0 + 1e-6, 5.0 + 1e-6));
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_box_select_filters_cell_neighbours() {
        let store = three_points();
        // (5, 5) shares a cell with the box but lies outside it
        let ids = box_select(&store, &Extent::new(-1.0, -1.0, 2.0, 2.0));
        assert_eq!(ids, vec!["a".to_string()]);
    }

    #[test]
    fn test_set_selection_drops_unknown_ids() {
        let store = three_points();
        let mut selection = SelectionSet::new();
        assert!(selection.set_selection(&store, ["a", "zzz"]));
        assert_eq!(selection.to_vec(), vec!["a".to_string()]);
        assert!(!selection.set_selection(&store, ["a"]));
    }

    #[test]
    fn test_toggle_one_flips_membership() {
        let store = three_points();
        let mut selection = SelectionSet::new();
        assert!(selection.toggle_one(&store, "b"));
        assert!(selection.contains("b"));
        assert!(selection.toggle_one(&store, "b"));
        assert!(selection.is_empty());
        assert!(!selection.toggle_one(&store, "nope"));
    }

    #[test]
    fn test_tombstoned_ids_are_pruned_on_mutation() {
        let mut store = three_points();
        let mut selection = SelectionSet::new();
        selection.set_selection(&store, ["a", "b"]);
        store.soft_delete(&["a".to_string()]);
        assert!(selection.toggle_one(&store, "c"));
        assert_eq!(selection.to_vec(), vec!["b".to_string(), "c".to_string()]);
    }
}
