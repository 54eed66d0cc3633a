//! Layer-related types and error definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dense, stable index of a point within its layer's store
pub type Slot = u32;

/// Errors raised while mutating a layer
#[derive(Debug, Error, PartialEq)]
pub enum LayerError {
    #[error("validation error: {0}")]
    Validation(String),
}

/// The two point layer flavours
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Plain high-volume points
    #[default]
    Points,
    /// Points carrying uncertainty ellipses
    GeoPoints,
}

impl LayerKind {
    pub fn has_ellipses(self) -> bool {
        matches!(self, LayerKind::GeoPoints)
    }
}

/// Axis-aligned rectangle in projected-plane units
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    /// Build an extent from two corners in any order
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            min_x: x0.min(x1),
            min_y: y0.min(y1),
            max_x: x0.max(x1),
            max_y: y0.max(y1),
        }
    }

    /// Square extent of half-size `radius` centred on `(x, y)`
    pub fn around(x: f64, y: f64, radius: f64) -> Self {
        let r = radius.abs();
        Self::new(x - r, y - r, x + r, y + r)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn is_finite(&self) -> bool {
        self.min_x.is_finite()
            && self.min_y.is_finite()
            && self.max_x.is_finite()
            && self.max_y.is_finite()
    }

    /// Inclusive containment test
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// True if the two extents share any point, edges included
    pub fn intersects(&self, other: &Extent) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    /// Grow the extent by `margin` on every side
    pub fn buffered(&self, margin: f64) -> Self {
        if !margin.is_finite() || margin <= 0.0 {
            return *self;
        }
        Self {
            min_x: self.min_x - margin,
            min_y: self.min_y - margin,
            max_x: self.max_x + margin,
            max_y: self.max_y + margin,
        }
    }
}
