//! Colors and rendering styles for point layers

use serde::{Deserialize, Serialize};

/// Straight (non-premultiplied) RGBA color, serialized as `[r, g, b, a]`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Rgba(pub [u8; 4]);

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self([r, g, b, a])
    }

    /// Unpack `(r << 24) | (g << 16) | (b << 8) | a`
    pub const fn from_packed(packed: u32) -> Self {
        Self([
            (packed >> 24) as u8,
            (packed >> 16) as u8,
            (packed >> 8) as u8,
            packed as u8,
        ])
    }

    pub const fn packed(self) -> u32 {
        let [r, g, b, a] = self.0;
        ((r as u32) << 24) | ((g as u32) << 16) | ((b as u32) << 8) | a as u32
    }

    /// Scale alpha by a layer opacity in `[0, 1]`
    pub fn with_opacity(self, opacity: f32) -> Self {
        let [r, g, b, a] = self.0;
        let opacity = if opacity.is_finite() {
            opacity.clamp(0.0, 1.0)
        } else {
            1.0
        };
        let a = (f32::from(a) * opacity).round() as u8;
        Self([r, g, b, a])
    }

    pub fn to_color(self) -> peniko::Color {
        let [r, g, b, a] = self.0;
        peniko::Color::from_rgba8(r, g, b, a)
    }
}

/// Marker style shared by both layer kinds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PointStyle {
    /// Radius in output pixels
    pub radius: f64,
    pub default_rgba: Rgba,
    pub selected_radius: f64,
    pub selected_rgba: Rgba,
}

impl Default for PointStyle {
    fn default() -> Self {
        Self {
            radius: 3.0,
            default_rgba: Rgba::new(255, 51, 51, 204),
            selected_radius: 6.0,
            selected_rgba: Rgba::new(0, 255, 255, 255),
        }
    }
}

/// Ellipse style for geo-point layers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EllipseStyle {
    pub stroke_rgba: Rgba,
    pub stroke_width: f64,
    /// Falls back to the selected point color
    pub selected_stroke_rgba: Option<Rgba>,
    /// Falls back to twice `stroke_width`
    pub selected_stroke_width: Option<f64>,
    pub fill: bool,
    pub fill_rgba: Rgba,
    /// Toggles unselected ellipses without hiding points
    pub ellipses_visible: bool,
    pub selected_ellipses_visible: bool,
    /// Ellipses whose semi-major axis is shorter than this many pixels are culled
    pub min_ellipse_px: f64,
    pub max_ellipses_per_path: usize,
    pub skip_ellipses_while_interacting: bool,
}

impl Default for EllipseStyle {
    fn default() -> Self {
        Self {
            stroke_rgba: Rgba::new(255, 204, 0, 180),
            stroke_width: 1.5,
            selected_stroke_rgba: None,
            selected_stroke_width: None,
            fill: false,
            fill_rgba: Rgba::new(255, 204, 0, 40),
            ellipses_visible: true,
            selected_ellipses_visible: true,
            min_ellipse_px: 0.0,
            max_ellipses_per_path: 2000,
            skip_ellipses_while_interacting: true,
        }
    }
}

/// Complete layer style
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LayerStyle {
    pub point: PointStyle,
    pub ellipse: EllipseStyle,
}

impl LayerStyle {
    /// Largest marker radius in output pixels
    pub fn max_point_radius(&self) -> f64 {
        self.point.radius.max(self.point.selected_radius).max(0.0)
    }

    /// Stroke color and width used for selected ellipses
    pub fn selected_ellipse_stroke(&self) -> (Rgba, f64) {
        let color = self
            .ellipse
            .selected_stroke_rgba
            .unwrap_or(self.point.selected_rgba);
        let width = self
            .ellipse
            .selected_stroke_width
            .unwrap_or(self.ellipse.stroke_width * 2.0);
        (color, width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_round_trip() {
        let c = Rgba::new(0x12, 0x34, 0x56, 0x78);
        assert_eq!(c.packed(), 0x1234_5678);
        assert_eq!(Rgba::from_packed(0x1234_5678), c);
    }

    #[test]
    fn test_opacity_scales_alpha_only() {
        let c = Rgba::new(10, 20, 30, 200).with_opacity(0.5);
        assert_eq!(c, Rgba::new(10, 20, 30, 100));
        assert_eq!(Rgba::new(1, 2, 3, 255).with_opacity(f32::NAN).0[3], 255);
    }

    #[test]
    fn test_style_defaults_from_partial_json() {
        let style: LayerStyle =
            serde_json::from_str(r#"{"point": {"radius": 4.0}}"#).expect("style should parse");
        assert_eq!(style.point.radius, 4.0);
        assert_eq!(style.point.selected_radius, 6.0);
        assert_eq!(style.ellipse.max_ellipses_per_path, 2000);
    }

    #[test]
    fn test_selected_ellipse_stroke_fallback() {
        let style = LayerStyle::default();
        let (color, width) = style.selected_ellipse_stroke();
        assert_eq!(color, style.point.selected_rgba);
        assert_eq!(width, 3.0);
    }
}
