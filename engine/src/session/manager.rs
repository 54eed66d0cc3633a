use std::ops::Range;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::layer::{
    Extent, LayerError, LayerKind, LayerStyle, LodConfig, PointBatch, PointLayer, Slot,
};
use crate::protocol::{Command, ErrorCode, Event};
use crate::render::{self, Surface, Viewport};
use crate::view::ExtentWatcher;

/// Map session errors
#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    #[error("Layer not found: {0}")]
    LayerNotFound(String),

    #[error("Layer already exists: {0}")]
    LayerExists(String),

    #[error(transparent)]
    Layer(#[from] LayerError),
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::LayerNotFound(_) => ErrorCode::LayerNotFound,
            SessionError::LayerExists(_) => ErrorCode::LayerExists,
            SessionError::Layer(LayerError::Validation(_)) => ErrorCode::Validation,
        }
    }
}

/// Outcome of a pointer click
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickHit {
    pub layer_id: String,
    pub id: String,
}

/// Map session: owns every point layer and dispatches host commands.
///
/// Commands run to completion one at a time; nothing here is shared across
/// threads, so a layer can never be observed half-mutated.
#[derive(Debug)]
pub struct MapSession {
    /// Draw order; later layers are on top
    layers: IndexMap<String, PointLayer>,
    config: EngineConfig,
    events: UnboundedSender<Event>,
    watcher: ExtentWatcher,
    viewport: Option<Viewport>,
}

impl MapSession {
    pub fn new(config: EngineConfig, events: UnboundedSender<Event>) -> Self {
        let watcher = ExtentWatcher::new(events.clone(), config.extent_debounce);
        Self {
            layers: IndexMap::new(),
            config,
            events,
            watcher,
            viewport: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn layer(&self, layer_id: &str) -> Option<&PointLayer> {
        self.layers.get(layer_id)
    }

    pub fn layer_ids(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }

    pub fn viewport(&self) -> Option<&Viewport> {
        self.viewport.as_ref()
    }

    pub fn watcher(&self) -> &ExtentWatcher {
        &self.watcher
    }

    fn layer_mut(&mut self, layer_id: &str) -> Result<&mut PointLayer, SessionError> {
        self.layers
            .get_mut(layer_id)
            .ok_or_else(|| SessionError::LayerNotFound(layer_id.to_string()))
    }

    /// Apply one command, reporting any failure as an error event
    pub fn dispatch(&mut self, command: Command) {
        let layer_id = command.layer_id().map(str::to_string);
        let command_type = command.command_type();
        if let Err(e) = self.handle(command) {
            warn!("Command {} failed: {}", command_type, e);
            self.emit(Event::Error {
                code: e.code(),
                message: e.to_string(),
                layer_id,
            });
        }
    }

    /// Split an ingestion command into chunks of at most `chunk_size` points.
    ///
    /// The whole batch is validated against its layer before splitting. If it
    /// would be rejected, a single error event is emitted and no chunks are
    /// returned, so a failing batch never lands partially. Other commands
    /// come back unchanged.
    pub fn split_ingestion(&self, command: Command, chunk_size: usize) -> Vec<Command> {
        let checked = match &command {
            Command::AddPoints(add) => Some((add.layer_id.as_str(), add.to_batch())),
            Command::AddPointsWithEllipses(add) => Some((add.layer_id.as_str(), add.to_batch())),
            _ => None,
        };
        if let Some((layer_id, batch)) = checked
            && batch.coords.len() > chunk_size.max(1)
        {
            let result = self
                .layer(layer_id)
                .ok_or_else(|| SessionError::LayerNotFound(layer_id.to_string()))
                .and_then(|layer| layer.validate_points(&batch).map_err(SessionError::from));
            if let Err(e) = result {
                warn!("Rejected {} point batch for layer {}: {}", batch.coords.len(), layer_id, e);
                self.emit(Event::Error {
                    code: e.code(),
                    message: e.to_string(),
                    layer_id: Some(layer_id.to_string()),
                });
                return Vec::new();
            }
        }
        command.into_chunks(chunk_size)
    }

    /// Apply one command
    pub fn handle(&mut self, command: Command) -> Result<(), SessionError> {
        counter!("fastpoints_commands_total", "type" => command.command_type()).increment(1);
        debug!("Handling command {}", command.command_type());

        match command {
            Command::AddLayer {
                layer_id,
                kind,
                cell_size,
                style,
                lod,
            } => self.add_layer(&layer_id, kind, cell_size, style, lod),
            Command::AddPoints(add) => self
                .add_points(&add.layer_id, &add.to_batch())
                .map(|_| ()),
            Command::AddPointsWithEllipses(add) => self
                .add_points(&add.layer_id, &add.to_batch())
                .map(|_| ()),
            Command::RemoveIds { layer_id, ids } => self.remove_ids(&layer_id, &ids).map(|_| ()),
            Command::Clear { layer_id } => self.clear(layer_id.as_deref()),
            Command::RemoveLayer { layer_id } => self.remove_layer(&layer_id),
            Command::SetOpacity { layer_id, opacity } => {
                self.layer_mut(&layer_id)?.set_opacity(opacity);
                Ok(())
            }
            Command::SetVisible { layer_id, visible } => {
                self.layer_mut(&layer_id)?.set_visible(visible);
                Ok(())
            }
            Command::SetSelectable {
                layer_id,
                selectable,
            } => {
                self.layer_mut(&layer_id)?.set_selectable(selectable);
                Ok(())
            }
            Command::SetEllipsesVisible { layer_id, visible } => {
                self.layer_mut(&layer_id)?.set_ellipses_visible(visible);
                Ok(())
            }
            Command::SetStyle { layer_id, style } => {
                self.layer_mut(&layer_id)?.set_style(style);
                Ok(())
            }
            Command::SetColors {
                layer_id,
                ids,
                colors,
            } => self.set_colors(&layer_id, &ids, &colors).map(|_| ()),
            Command::SelectSet { layer_id, ids } => self.select_set(&layer_id, &ids),
            Command::WatchViewExtent {
                enabled,
                token,
                debounce_ms,
            } => {
                self.watch_view_extent(enabled, token, debounce_ms.map(Duration::from_millis));
                Ok(())
            }
            Command::ViewChanged { viewport } => {
                self.view_changed(viewport);
                Ok(())
            }
            Command::PointerClick { x, y, toggle } => {
                self.click(x, y, toggle);
                Ok(())
            }
            Command::PointerBox { extent } => {
                self.box_select(&extent);
                Ok(())
            }
            Command::Unknown => {
                warn!("Ignoring unknown command");
                Ok(())
            }
        }
    }

    pub fn add_layer(
        &mut self,
        layer_id: &str,
        kind: LayerKind,
        cell_size: Option<f64>,
        style: LayerStyle,
        lod: Option<LodConfig>,
    ) -> Result<(), SessionError> {
        if self.layers.contains_key(layer_id) {
            return Err(SessionError::LayerExists(layer_id.to_string()));
        }
        let cell_size = cell_size.unwrap_or(self.config.default_cell_size);
        let lod = lod.unwrap_or_else(|| self.config.lod.clone());
        let layer = PointLayer::new(layer_id, kind, cell_size, style, lod);
        info!(
            "Added {:?} layer {} (cell size {})",
            kind,
            layer_id,
            layer.store().grid().cell_size()
        );
        self.layers.insert(layer_id.to_string(), layer);
        Ok(())
    }

    pub fn add_points(
        &mut self,
        layer_id: &str,
        batch: &PointBatch,
    ) -> Result<Range<Slot>, SessionError> {
        let start = Instant::now();
        let layer = self.layer_mut(layer_id)?;
        let slots = layer.add_points(batch)?;
        let added = slots.len();

        counter!("fastpoints_points_ingested_total").increment(added as u64);
        histogram!("fastpoints_ingest_duration_seconds").record(start.elapsed().as_secs_f64());
        info!(
            "Layer {} ingested {} points ({} live) in {:?}",
            layer_id,
            added,
            layer.store().live_count(),
            start.elapsed()
        );
        Ok(slots)
    }

    /// Returns the ids actually removed
    pub fn remove_ids(&mut self, layer_id: &str, ids: &[String]) -> Result<Vec<String>, SessionError> {
        let layer = self.layer_mut(layer_id)?;
        let outcome = layer.remove_ids(ids);
        counter!("fastpoints_points_removed_total").increment(outcome.removed.len() as u64);
        debug!("Layer {} removed {} of {} ids", layer_id, outcome.removed.len(), ids.len());
        if outcome.selection_changed {
            self.emit_selection(layer_id);
        }
        Ok(outcome.removed)
    }

    /// Clear one layer, or all of them when `layer_id` is `None`
    pub fn clear(&mut self, layer_id: Option<&str>) -> Result<(), SessionError> {
        let targets: Vec<String> = match layer_id {
            Some(id) => {
                self.layer_mut(id)?;
                vec![id.to_string()]
            }
            None => self.layers.keys().cloned().collect(),
        };
        for id in targets {
            let selection_changed = self
                .layers
                .get_mut(&id)
                .is_some_and(|layer| layer.clear());
            info!("Cleared layer {}", id);
            if selection_changed {
                self.emit_selection(&id);
            }
        }
        Ok(())
    }

    pub fn remove_layer(&mut self, layer_id: &str) -> Result<(), SessionError> {
        self.layers
            .shift_remove(layer_id)
            .ok_or_else(|| SessionError::LayerNotFound(layer_id.to_string()))?;
        info!("Removed layer {}", layer_id);
        Ok(())
    }

    /// Returns the ids that matched no live point
    pub fn set_colors(
        &mut self,
        layer_id: &str,
        ids: &[String],
        colors: &[u32],
    ) -> Result<Vec<String>, SessionError> {
        let unknown = self.layer_mut(layer_id)?.set_colors(ids, colors)?;
        if !unknown.is_empty() {
            debug!("Layer {} ignored colors for {} unknown ids", layer_id, unknown.len());
        }
        Ok(unknown)
    }

    pub fn select_set(&mut self, layer_id: &str, ids: &[String]) -> Result<(), SessionError> {
        if self.layer_mut(layer_id)?.select_set(ids) {
            self.emit_selection(layer_id);
        }
        Ok(())
    }

    pub fn watch_view_extent(&mut self, enabled: bool, token: u64, debounce: Option<Duration>) {
        if enabled {
            self.watcher.enable(token, debounce);
        } else {
            self.watcher.disable();
        }
    }

    /// Record the new view; visible layers redraw on the next paint if it moved
    pub fn view_changed(&mut self, viewport: Viewport) {
        if self.viewport != Some(viewport) {
            for layer in self.layers.values_mut().filter(|l| l.is_visible()) {
                layer.mark_dirty();
            }
        }
        self.viewport = Some(viewport);
        self.watcher.view_changed(viewport);
    }

    /// Pick radius in projected units at the current resolution
    fn pick_radius(&self) -> f64 {
        let resolution = self
            .viewport
            .map(|v| v.resolution)
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(1.0);
        self.config.pick_radius_px.max(0.0) * resolution
    }

    /// Click at projected `(x, y)`.
    ///
    /// Layers are tried topmost first and the first hit wins. A plain click
    /// selects only the hit point across all layers; a toggle click flips the
    /// hit point's membership. A plain click on empty space clears every
    /// interactive layer's selection.
    pub fn click(&mut self, x: f64, y: f64, toggle: bool) -> Option<ClickHit> {
        let radius = self.pick_radius();
        let hit = self
            .layers
            .values()
            .rev()
            .filter(|layer| layer.is_visible() && layer.is_selectable())
            .find_map(|layer| {
                layer.pick(x, y, radius).map(|id| ClickHit {
                    layer_id: layer.id().to_string(),
                    id: id.to_string(),
                })
            });

        let mut changed = Vec::new();
        match (&hit, toggle) {
            (Some(hit), true) => {
                if let Some(layer) = self.layers.get_mut(&hit.layer_id)
                    && layer.toggle_one(&hit.id)
                {
                    changed.push(hit.layer_id.clone());
                }
            }
            (Some(hit), false) => {
                for layer in self.interactive_layers_mut() {
                    let ids = if layer.id() == hit.layer_id {
                        vec![hit.id.clone()]
                    } else {
                        Vec::new()
                    };
                    if layer.select_set(&ids) {
                        changed.push(layer.id().to_string());
                    }
                }
            }
            (None, true) => {}
            (None, false) => {
                for layer in self.interactive_layers_mut() {
                    if layer.select_set(&[]) {
                        changed.push(layer.id().to_string());
                    }
                }
            }
        }
        for layer_id in changed {
            self.emit_selection(&layer_id);
        }
        hit
    }

    /// Replace the selection of every interactive layer with the points inside `extent`
    pub fn box_select(&mut self, extent: &Extent) {
        let changed: Vec<String> = self
            .interactive_layers_mut()
            .filter_map(|layer| layer.box_select(extent).then(|| layer.id().to_string()))
            .collect();
        for layer_id in changed {
            self.emit_selection(&layer_id);
        }
    }

    fn interactive_layers_mut(&mut self) -> impl Iterator<Item = &mut PointLayer> {
        self.layers
            .values_mut()
            .filter(|layer| layer.is_visible() && layer.is_selectable())
    }

    /// Ids of layers invalidated since the last call, in draw order
    pub fn take_dirty(&mut self) -> Vec<String> {
        self.layers
            .values_mut()
            .filter_map(|layer| layer.take_dirty().then(|| layer.id().to_string()))
            .collect()
    }

    pub fn render(&self, layer_id: &str, viewport: &Viewport) -> Result<Surface, SessionError> {
        let layer = self
            .layers
            .get(layer_id)
            .ok_or_else(|| SessionError::LayerNotFound(layer_id.to_string()))?;
        Ok(render::render_layer(layer, viewport))
    }

    /// Redraw every dirty layer against the last known viewport.
    ///
    /// Multiple invalidations since the previous paint collapse into one
    /// frame per layer. Nothing is drawn until a viewport is known.
    pub fn paint(&mut self) -> Vec<(String, Surface)> {
        let Some(viewport) = self.viewport else {
            return Vec::new();
        };
        let dirty = self.take_dirty();
        let mut frames = Vec::with_capacity(dirty.len());
        for layer_id in dirty {
            if let Some(layer) = self.layers.get(&layer_id) {
                let surface = render::render_layer(layer, &viewport);
                self.emit(Event::FrameRendered {
                    layer_id: layer_id.clone(),
                    revision: layer.revision(),
                    width: surface.width,
                    height: surface.height,
                    stats: surface.stats.clone(),
                });
                frames.push((layer_id, surface));
            }
        }
        frames
    }

    fn emit_selection(&self, layer_id: &str) {
        let Some(layer) = self.layers.get(layer_id) else {
            return;
        };
        counter!("fastpoints_selection_events_total").increment(1);
        self.emit(Event::Selection {
            layer_id: layer_id.to_string(),
            ids: layer.selection().to_vec(),
        });
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            warn!("Event receiver dropped");
        }
    }
}
