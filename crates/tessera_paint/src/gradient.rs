//! Gradient fills
//!
//! Stops are uploaded into a shared per-frame stop buffer; commands reference
//! a contiguous range of it together with a [`GradientKind`].

use crate::color::Color;

/// A gradient stop
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GradientStop {
    pub offset: f32, // 0.0 to 1.0
    pub color: Color,
}

impl GradientStop {
    pub const fn new(offset: f32, color: Color) -> Self {
        Self { offset, color }
    }
}

/// How the shader maps a pixel to a stop offset (must match shader constants)
#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GradientKind {
    /// Solid fill, no stops
    #[default]
    None = 0,
    /// Params: (x0, y0, x1, y1)
    Linear = 1,
    /// Params: (cx, cy, radius, 0)
    Radial = 2,
    /// Params: (cx, cy, start_angle, 0)
    Conic = 3,
}

impl GradientKind {
    pub fn from_bits(bits: u32) -> Self {
        match bits {
            1 => GradientKind::Linear,
            2 => GradientKind::Radial,
            3 => GradientKind::Conic,
            _ => GradientKind::None,
        }
    }
}
