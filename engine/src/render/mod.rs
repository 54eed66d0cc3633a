//! Rasterization of point layers
//!
//! The renderer borrows a layer immutably for the whole frame, so a draw can
//! never observe a half-applied mutation.

pub mod canvas;

pub use canvas::render_layer;

use serde::{Deserialize, Serialize};

use crate::layer::{Extent, LodTier};

/// Largest canvas edge the rasterizer accepts
pub const MAX_CANVAS_PX: u32 = u16::MAX as u32;

fn default_pixel_ratio() -> f64 {
    1.0
}

/// View state supplied by the embedding map on every paint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Viewport {
    pub extent: Extent,
    /// Projected units per CSS pixel
    pub resolution: f64,
    #[serde(default = "default_pixel_ratio")]
    pub pixel_ratio: f64,
    /// Output size in CSS pixels
    pub size: [u32; 2],
    /// Set while the user is dragging or zooming
    #[serde(default)]
    pub interacting: bool,
}

impl Viewport {
    /// Viewport whose resolution is derived from the extent width
    pub fn new(extent: Extent, size: [u32; 2]) -> Self {
        let resolution = if size[0] > 0 {
            extent.width() / f64::from(size[0])
        } else {
            0.0
        };
        Self {
            extent,
            resolution,
            pixel_ratio: 1.0,
            size,
            interacting: false,
        }
    }

    pub fn with_pixel_ratio(mut self, pixel_ratio: f64) -> Self {
        self.pixel_ratio = pixel_ratio;
        self
    }

    pub fn with_interacting(mut self, interacting: bool) -> Self {
        self.interacting = interacting;
        self
    }

    /// Pixel ratio, with unusable values replaced by 1
    pub fn effective_pixel_ratio(&self) -> f64 {
        if self.pixel_ratio.is_finite() && self.pixel_ratio > 0.0 {
            self.pixel_ratio
        } else {
            1.0
        }
    }

    /// Device-pixel canvas size, at least 1x1
    pub fn canvas_size(&self) -> (u16, u16) {
        let ratio = self.effective_pixel_ratio();
        let edge = |css: u32| {
            let px = (f64::from(css) * ratio).round();
            px.clamp(1.0, f64::from(MAX_CANVAS_PX)) as u16
        };
        (edge(self.size[0]), edge(self.size[1]))
    }
}

/// Maps projected coordinates onto canvas pixels, Y flipped
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelTransform {
    min_x: f64,
    max_y: f64,
    scale_x: f64,
    scale_y: f64,
}

impl PixelTransform {
    /// `None` for empty or non-finite extents
    pub fn new(extent: &Extent, width_px: u16, height_px: u16) -> Option<Self> {
        if !extent.is_finite() || extent.width() <= 0.0 || extent.height() <= 0.0 {
            return None;
        }
        Some(Self {
            min_x: extent.min_x,
            max_y: extent.max_y,
            scale_x: f64::from(width_px) / extent.width(),
            scale_y: f64::from(height_px) / extent.height(),
        })
    }

    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.min_x) * self.scale_x,
            (self.max_y - y) * self.scale_y,
        )
    }

    /// Scale for lengths, pixels treated as square
    pub fn length_scale(&self) -> f64 {
        (self.scale_x * self.scale_y).sqrt()
    }
}

/// Counters describing one rendered frame
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RenderStats {
    pub tier: Option<LodTier>,
    pub cells_touched: u64,
    pub candidates: usize,
    pub points_drawn: usize,
    pub selected_points_drawn: usize,
    pub ellipses_drawn: usize,
    pub ellipses_culled: usize,
    pub ellipses_decimated: usize,
    /// Fill and stroke calls issued to the rasterizer
    pub path_calls: usize,
}

/// Rendered RGBA surface, straight alpha, row-major
#[derive(Debug, Clone)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
    pixels: Vec<[u8; 4]>,
    pub stats: RenderStats,
}

impl Surface {
    pub fn new(width: u32, height: u32, pixels: Vec<[u8; 4]>, stats: RenderStats) -> Self {
        Self {
            width,
            height,
            pixels,
            stats,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get((y * self.width + x) as usize).copied()
    }

    pub fn pixels(&self) -> &[[u8; 4]] {
        &self.pixels
    }

    /// Flattened `r, g, b, a` bytes
    pub fn to_rgba_bytes(&self) -> Vec<u8> {
        self.pixels.iter().flatten().copied().collect()
    }

    /// Count of pixels with non-zero alpha
    pub fn painted_pixels(&self) -> usize {
        self.pixels.iter().filter(|p| p[3] > 0).count()
    }
}
