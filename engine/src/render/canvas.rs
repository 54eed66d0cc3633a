//! CPU canvas renderer for point and ellipse layers
//!
//! Draw order is fixed: unselected ellipses, selected ellipses, unselected
//! points, selected points. Selected geometry comes from the selection set
//! directly and never passes through level-of-detail.

use std::time::Instant;

use indexmap::IndexMap;
use metrics::histogram;
use tracing::debug;
use vello_cpu::kurbo::{BezPath, Circle, Ellipse, Shape, Stroke};
use vello_cpu::{Pixmap, RenderContext};

use super::{PixelTransform, RenderStats, Surface, Viewport};
use crate::layer::{EllipseStyle, Extent, PointLayer, PointStore, Rgba, Slot, lod};

/// Flattening tolerance for curves, in device pixels
const TOLERANCE: f64 = 0.1;

/// Rasterize one layer into a fresh surface sized to the viewport
pub fn render_layer(layer: &PointLayer, viewport: &Viewport) -> Surface {
    let start = Instant::now();
    let (width, height) = viewport.canvas_size();
    let mut ctx = RenderContext::new(width, height);
    let mut stats = RenderStats::default();

    if layer.is_visible()
        && layer.opacity() > 0.0
        && !layer.store().is_empty()
        && let Some(transform) = PixelTransform::new(&viewport.extent, width, height)
    {
        draw(&mut ctx, layer, viewport, &transform, &mut stats);
    }

    let mut pixmap = Pixmap::new(width, height);
    ctx.flush();
    ctx.render_to_pixmap(&mut pixmap);
    let pixels = pixmap
        .take_unpremultiplied()
        .into_iter()
        .map(|p| [p.r, p.g, p.b, p.a])
        .collect();

    histogram!("fastpoints_render_duration_seconds").record(start.elapsed().as_secs_f64());
    histogram!("fastpoints_render_candidates").record(stats.candidates as f64);
    debug!(
        "Rendered layer {} at {}x{}: {:?} tier, {} points, {} ellipses in {:?}",
        layer.id(),
        width,
        height,
        stats.tier,
        stats.points_drawn + stats.selected_points_drawn,
        stats.ellipses_drawn,
        start.elapsed()
    );

    Surface::new(u32::from(width), u32::from(height), pixels, stats)
}

fn draw(
    ctx: &mut RenderContext,
    layer: &PointLayer,
    viewport: &Viewport,
    transform: &PixelTransform,
    stats: &mut RenderStats,
) {
    let store = layer.store();
    let style = layer.style();
    let opacity = layer.opacity();
    let ratio = viewport.effective_pixel_ratio();

    // Grow the query so markers centred just outside the view still draw
    let resolution = viewport.resolution;
    let marker_margin = if resolution.is_finite() && resolution > 0.0 {
        style.max_point_radius() * resolution
    } else {
        0.0
    };
    let query = viewport.extent.buffered(marker_margin);

    let plan = lod::plan(store, &query, Some(resolution), layer.lod());
    stats.tier = Some(plan.tier);
    stats.cells_touched = plan.cells_touched;
    stats.candidates = plan.candidates.len();

    let selection = layer.selection();
    let unselected: Vec<Slot> = plan
        .candidates
        .into_iter()
        .filter(|&slot| !selection.contains(store.id(slot)))
        .collect();
    let selected_slots: Vec<Slot> = selection.iter().filter_map(|id| store.slot_of(id)).collect();
    let selected: Vec<Slot> = selected_slots
        .iter()
        .copied()
        .filter(|&slot| {
            let (x, y) = store.position(slot);
            query.contains(x, y)
        })
        .collect();

    if store.has_ellipses() {
        let ellipse = &style.ellipse;
        let fill = ellipse.fill.then(|| ellipse.fill_rgba.with_opacity(opacity));
        let skip_unselected = viewport.interacting && ellipse.skip_ellipses_while_interacting;

        if ellipse.ellipses_visible && !skip_unselected {
            let mut candidates = unselected.clone();
            candidates.extend(straddling_ellipses(layer, viewport, &query));
            let before = candidates.len();
            let thinned = lod::decimate_ellipses(candidates, layer.lod());
            stats.ellipses_decimated += before - thinned.len();
            let paint = EllipsePaint {
                stroke: ellipse.stroke_rgba.with_opacity(opacity),
                stroke_width: ellipse.stroke_width * ratio,
                fill,
            };
            draw_ellipses(ctx, store, &thinned, transform, ellipse, ratio, &paint, stats);
        }
        if ellipse.selected_ellipses_visible {
            let reaching: Vec<Slot> = selected_slots
                .iter()
                .copied()
                .filter(|&slot| reaches(store, slot, &viewport.extent))
                .collect();
            let (color, width) = style.selected_ellipse_stroke();
            let paint = EllipsePaint {
                stroke: color.with_opacity(opacity),
                stroke_width: width * ratio,
                fill,
            };
            draw_ellipses(ctx, store, &reaching, transform, ellipse, ratio, &paint, stats);
        }
    }

    let radius = style.point.radius * ratio;
    if radius > 0.0 {
        let mut by_color: IndexMap<Rgba, BezPath> = IndexMap::new();
        for &slot in &unselected {
            let color = store
                .color(slot)
                .unwrap_or(style.point.default_rgba)
                .with_opacity(opacity);
            let (x, y) = store.position(slot);
            let path = by_color.entry(color).or_default();
            push_shape(path, &Circle::new(transform.to_pixel(x, y), radius));
            stats.points_drawn += 1;
        }
        for (color, path) in &by_color {
            ctx.set_paint(color.to_color());
            ctx.fill_path(path);
            stats.path_calls += 1;
        }
    }

    let selected_radius = style.point.selected_radius * ratio;
    if selected_radius > 0.0 && !selected.is_empty() {
        let mut path = BezPath::new();
        for &slot in &selected {
            let (x, y) = store.position(slot);
            push_shape(&mut path, &Circle::new(transform.to_pixel(x, y), selected_radius));
        }
        ctx.set_paint(style.point.selected_rgba.with_opacity(opacity).to_color());
        ctx.fill_path(&path);
        stats.path_calls += 1;
        stats.selected_points_drawn += selected.len();
    }
}

/// Unselected ellipses centred outside `query` whose outline reaches the view.
///
/// The search ring is capped at one view size past the query edge and thinned
/// by the same level of detail as the points; it never changes the point tier.
fn straddling_ellipses(layer: &PointLayer, viewport: &Viewport, query: &Extent) -> Vec<Slot> {
    let store = layer.store();
    let view = &viewport.extent;
    let reach = store
        .max_semi_major()
        .min(view.width().max(view.height()));
    if !reach.is_finite() || reach <= 0.0 {
        return Vec::new();
    }
    let ring = query.buffered(reach);
    let selection = layer.selection();
    lod::plan(store, &ring, Some(viewport.resolution), layer.lod())
        .candidates
        .into_iter()
        .filter(|&slot| {
            let (x, y) = store.position(slot);
            !query.contains(x, y)
                && !selection.contains(store.id(slot))
                && reaches(store, slot, view)
        })
        .collect()
}

/// Whether the bounding square of a slot's ellipse overlaps `view`
fn reaches(store: &PointStore, slot: Slot, view: &Extent) -> bool {
    let Some(e) = store.ellipse(slot) else {
        return false;
    };
    let (x, y) = store.position(slot);
    Extent::around(x, y, e.semi_major.max(e.semi_minor)).intersects(view)
}

struct EllipsePaint {
    stroke: Rgba,
    stroke_width: f64,
    fill: Option<Rgba>,
}

/// Stroke (and optionally fill) ellipses, `max_ellipses_per_path` per call
#[allow(clippy::too_many_arguments)]
fn draw_ellipses(
    ctx: &mut RenderContext,
    store: &PointStore,
    slots: &[Slot],
    transform: &PixelTransform,
    style: &EllipseStyle,
    ratio: f64,
    paint: &EllipsePaint,
    stats: &mut RenderStats,
) {
    let length_scale = transform.length_scale();
    let min_px = style.min_ellipse_px.max(0.0) * ratio;

    for batch in slots.chunks(style.max_ellipses_per_path.max(1)) {
        let mut path = BezPath::new();
        let mut shapes = 0;
        for &slot in batch {
            let Some(e) = store.ellipse(slot) else {
                continue;
            };
            let a = e.semi_major * length_scale;
            let b = e.semi_minor * length_scale;
            let half_axis = a.max(b);
            if half_axis <= 0.0 || half_axis < min_px {
                stats.ellipses_culled += 1;
                continue;
            }
            let (x, y) = store.position(slot);
            // Pixel rows grow downward, so angles flip sign
            push_shape(
                &mut path,
                &Ellipse::new(transform.to_pixel(x, y), (a, b), -e.rotation),
            );
            shapes += 1;
        }
        if shapes == 0 {
            continue;
        }
        if let Some(fill) = paint.fill {
            ctx.set_paint(fill.to_color());
            ctx.fill_path(&path);
            stats.path_calls += 1;
        }
        if paint.stroke_width > 0.0 {
            ctx.set_stroke(Stroke::new(paint.stroke_width));
            ctx.set_paint(paint.stroke.to_color());
            ctx.stroke_path(&path);
            stats.path_calls += 1;
        }
        stats.ellipses_drawn += shapes;
    }
}

/// Append a closed shape as its own sub-path
fn push_shape(path: &mut BezPath, shape: &impl Shape) {
    for el in shape.path_elements(TOLERANCE) {
        path.push(el);
    }
}
