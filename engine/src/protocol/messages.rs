use serde::{Deserialize, Serialize};

use crate::layer::{EllipseBatch, Extent, LayerKind, LayerStyle, LodConfig, PointBatch};
use crate::render::{RenderStats, Viewport};

/// Host to engine commands
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Create an empty point layer
    AddLayer {
        layer_id: String,
        #[serde(default)]
        kind: LayerKind,
        /// Grid cell edge in projected units, engine default when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cell_size: Option<f64>,
        #[serde(default)]
        style: LayerStyle,
        /// Per-layer LOD thresholds, engine defaults when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lod: Option<LodConfig>,
    },
    AddPoints(AddPoints),
    AddPointsWithEllipses(AddPointsWithEllipses),
    RemoveIds { layer_id: String, ids: Vec<String> },
    /// Clear one layer, or every layer when `layer_id` is absent
    Clear {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        layer_id: Option<String>,
    },
    RemoveLayer { layer_id: String },
    SetOpacity { layer_id: String, opacity: f32 },
    SetVisible { layer_id: String, visible: bool },
    SetSelectable { layer_id: String, selectable: bool },
    SetEllipsesVisible { layer_id: String, visible: bool },
    SetStyle { layer_id: String, style: LayerStyle },
    /// Packed `0xRRGGBBAA` colors, parallel to `ids`
    SetColors {
        layer_id: String,
        ids: Vec<String>,
        colors: Vec<u32>,
    },
    /// Replace the selection with exactly these ids
    SelectSet { layer_id: String, ids: Vec<String> },
    WatchViewExtent {
        enabled: bool,
        #[serde(default)]
        token: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        debounce_ms: Option<u64>,
    },
    /// The map view moved or resized
    ViewChanged { viewport: Viewport },
    /// Click at projected `(x, y)`; `toggle` mirrors a modifier key
    PointerClick {
        x: f64,
        y: f64,
        #[serde(default)]
        toggle: bool,
    },
    /// Drag-box selection in projected units
    PointerBox { extent: Extent },
    /// Any unrecognized discriminant
    #[serde(other)]
    Unknown,
}

impl Command {
    /// Get the command type name for metrics
    pub fn command_type(&self) -> &'static str {
        match self {
            Command::AddLayer { .. } => "add_layer",
            Command::AddPoints(_) => "add_points",
            Command::AddPointsWithEllipses(_) => "add_points_with_ellipses",
            Command::RemoveIds { .. } => "remove_ids",
            Command::Clear { .. } => "clear",
            Command::RemoveLayer { .. } => "remove_layer",
            Command::SetOpacity { .. } => "set_opacity",
            Command::SetVisible { .. } => "set_visible",
            Command::SetSelectable { .. } => "set_selectable",
            Command::SetEllipsesVisible { .. } => "set_ellipses_visible",
            Command::SetStyle { .. } => "set_style",
            Command::SetColors { .. } => "set_colors",
            Command::SelectSet { .. } => "select_set",
            Command::WatchViewExtent { .. } => "watch_view_extent",
            Command::ViewChanged { .. } => "view_changed",
            Command::PointerClick { .. } => "pointer_click",
            Command::PointerBox { .. } => "pointer_box",
            Command::Unknown => "unknown",
        }
    }

    /// Split ingestion commands into chunks of at most `size` points; other
    /// commands pass through unchanged
    pub fn into_chunks(self, size: usize) -> Vec<Command> {
        match self {
            Command::AddPoints(add) => add.chunks(size).into_iter().map(Command::AddPoints).collect(),
            Command::AddPointsWithEllipses(add) => add
                .chunks(size)
                .into_iter()
                .map(Command::AddPointsWithEllipses)
                .collect(),
            other => vec![other],
        }
    }

    /// Layer this command targets, if any
    pub fn layer_id(&self) -> Option<&str> {
        match self {
            Command::AddLayer { layer_id, .. }
            | Command::RemoveIds { layer_id, .. }
            | Command::RemoveLayer { layer_id }
            | Command::SetOpacity { layer_id, .. }
            | Command::SetVisible { layer_id, .. }
            | Command::SetSelectable { layer_id, .. }
            | Command::SetEllipsesVisible { layer_id, .. }
            | Command::SetStyle { layer_id, .. }
            | Command::SetColors { layer_id, .. }
            | Command::SelectSet { layer_id, .. } => Some(layer_id),
            Command::AddPoints(batch) => Some(&batch.layer_id),
            Command::AddPointsWithEllipses(batch) => Some(&batch.layer_id),
            Command::Clear { layer_id } => layer_id.as_deref(),
            Command::WatchViewExtent { .. }
            | Command::ViewChanged { .. }
            | Command::PointerClick { .. }
            | Command::PointerBox { .. }
            | Command::Unknown => None,
        }
    }
}

/// Plain points for a layer, coordinates as `[lon, lat]` degrees
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddPoints {
    pub layer_id: String,
    pub coords: Vec<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colors: Option<Vec<u32>>,
}

impl AddPoints {
    pub fn to_batch(&self) -> PointBatch {
        PointBatch {
            coords: self.coords.clone(),
            ids: self.ids.clone(),
            colors: self.colors.clone(),
            ellipses: None,
        }
    }

    /// Split into commands of at most `size` points each.
    ///
    /// Batches with inconsistent array lengths are returned whole so the
    /// layer still rejects them atomically.
    pub fn chunks(&self, size: usize) -> Vec<AddPoints> {
        let n = self.coords.len();
        let consistent = self.ids.as_ref().is_none_or(|v| v.len() == n)
            && self.colors.as_ref().is_none_or(|v| v.len() == n);
        if !consistent || n <= size.max(1) {
            return vec![self.clone()];
        }
        chunk_ranges(n, size)
            .map(|(start, end)| AddPoints {
                layer_id: self.layer_id.clone(),
                coords: self.coords[start..end].to_vec(),
                ids: self.ids.as_ref().map(|v| v[start..end].to_vec()),
                colors: self.colors.as_ref().map(|v| v[start..end].to_vec()),
            })
            .collect()
    }
}

/// Points with real-world uncertainty ellipses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddPointsWithEllipses {
    pub layer_id: String,
    pub coords: Vec<[f64; 2]>,
    pub semi_major_m: Vec<f64>,
    pub semi_minor_m: Vec<f64>,
    /// Major-axis bearing, degrees clockwise from north
    pub tilt_deg: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colors: Option<Vec<u32>>,
}

impl AddPointsWithEllipses {
    pub fn to_batch(&self) -> PointBatch {
        PointBatch {
            coords: self.coords.clone(),
            ids: self.ids.clone(),
            colors: self.colors.clone(),
            ellipses: Some(EllipseBatch {
                semi_major_m: self.semi_major_m.clone(),
                semi_minor_m: self.semi_minor_m.clone(),
                tilt_deg: self.tilt_deg.clone(),
            }),
        }
    }

    pub fn chunks(&self, size: usize) -> Vec<AddPointsWithEllipses> {
        let n = self.coords.len();
        let consistent = self.semi_major_m.len() == n
            && self.semi_minor_m.len() == n
            && self.tilt_deg.len() == n
            && self.ids.as_ref().is_none_or(|v| v.len() == n)
            && self.colors.as_ref().is_none_or(|v| v.len() == n);
        if !consistent || n <= size.max(1) {
            return vec![self.clone()];
        }
        chunk_ranges(n, size)
            .map(|(start, end)| AddPointsWithEllipses {
                layer_id: self.layer_id.clone(),
                coords: self.coords[start..end].to_vec(),
                semi_major_m: self.semi_major_m[start..end].to_vec(),
                semi_minor_m: self.semi_minor_m[start..end].to_vec(),
                tilt_deg: self.tilt_deg[start..end].to_vec(),
                ids: self.ids.as_ref().map(|v| v[start..end].to_vec()),
                colors: self.colors.as_ref().map(|v| v[start..end].to_vec()),
            })
            .collect()
    }
}

fn chunk_ranges(n: usize, size: usize) -> impl Iterator<Item = (usize, usize)> {
    let size = size.max(1);
    (0..n).step_by(size).map(move |start| (start, (start + size).min(n)))
}

/// Engine to host events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The engine is accepting commands
    Ready {},
    /// A layer's selection changed
    Selection { layer_id: String, ids: Vec<String> },
    /// Debounced snapshot of the visible extent
    ViewExtentChanged {
        lon_min: f64,
        lat_min: f64,
        lon_max: f64,
        lat_max: f64,
        zoom: f64,
        resolution: f64,
        token: u64,
        seq: u64,
    },
    /// A command failed
    Error {
        code: ErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        layer_id: Option<String>,
    },
    /// A dirty layer was redrawn
    FrameRendered {
        layer_id: String,
        revision: u64,
        width: u32,
        height: u32,
        stats: RenderStats,
    },
}

impl Event {
    /// Get the event type name for metrics
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::Ready {} => "ready",
            Event::Selection { .. } => "selection",
            Event::ViewExtentChanged { .. } => "view_extent_changed",
            Event::Error { .. } => "error",
            Event::FrameRendered { .. } => "frame_rendered",
        }
    }
}

/// Error codes carried by [`Event::Error`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    LayerNotFound,
    LayerExists,
    Validation,
    InvalidMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_points_parses_optional_fields() {
        let json = r#"{"type":"add_points","layer_id":"l1","coords":[[1.0,2.0],[3.0,4.0]]}"#;
        let cmd: Command = serde_json::from_str(json).expect("should parse");
        match cmd {
            Command::AddPoints(add) => {
                assert_eq!(add.layer_id, "l1");
                assert_eq!(add.coords.len(), 2);
                assert!(add.ids.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unknown_discriminant_is_tolerated() {
        let cmd: Command =
            serde_json::from_str(r#"{"type":"teleport","layer_id":"x"}"#).expect("should parse");
        assert_eq!(cmd, Command::Unknown);
        assert_eq!(cmd.command_type(), "unknown");
    }

    #[test]
    fn test_add_layer_defaults() {
        let cmd: Command = serde_json::from_str(r#"{"type":"add_layer","layer_id":"g"}"#).unwrap();
        match cmd {
            Command::AddLayer {
                kind,
                cell_size,
                lod,
                style,
                ..
            } => {
                assert_eq!(kind, LayerKind::Points);
                assert_eq!(cell_size, None);
                assert_eq!(lod, None);
                assert_eq!(style, LayerStyle::default());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_clear_has_no_layer() {
        let cmd: Command = serde_json::from_str(r#"{"type":"clear"}"#).unwrap();
        assert_eq!(cmd, Command::Clear { layer_id: None });
        assert_eq!(cmd.layer_id(), None);
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let ready = serde_json::to_value(Event::Ready {}).unwrap();
        assert_eq!(ready, serde_json::json!({"type": "ready"}));

        let err = serde_json::to_value(Event::Error {
            code: ErrorCode::LayerNotFound,
            message: "Layer not found: x".to_string(),
            layer_id: None,
        })
        .unwrap();
        assert_eq!(err["code"], "layer_not_found");
        assert!(err.get("layer_id").is_none());
    }

    #[test]
    fn test_chunks_split_parallel_arrays() {
        let add = AddPoints {
            layer_id: "l".to_string(),
            coords: (0..5).map(|i| [i as f64, 0.0]).collect(),
            ids: Some((0..5).map(|i| format!("p{}", i)).collect()),
            colors: None,
        };
        let chunks = add.chunks(2);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].coords, vec![[4.0, 0.0]]);
        assert_eq!(chunks[1].ids.as_deref(), Some(&["p2".to_string(), "p3".to_string()][..]));
    }

    #[test]
    fn test_inconsistent_batch_is_not_split() {
        let add = AddPointsWithEllipses {
            layer_id: "g".to_string(),
            coords: vec![[0.0, 0.0]; 4],
            semi_major_m: vec![1.0; 4],
            semi_minor_m: vec![1.0; 3],
            tilt_deg: vec![0.0; 4],
            ids: None,
            colors: None,
        };
        assert_eq!(add.chunks(2).len(), 1);
    }
}
