//! Tessera Paint Types
//!
//! Plain value types shared between callers recording SDF draw commands and
//! the GPU command buffer:
//!
//! - Points, rectangles and corner radii
//! - Linear colors and gradient stops
//! - Blend modes
//! - Paths (lines, quadratic and cubic curves) for stroked and filled outlines

pub mod blend;
pub mod color;
pub mod gradient;
pub mod path;
pub mod primitives;

pub use blend::BlendMode;
pub use color::Color;
pub use gradient::{GradientKind, GradientStop};
pub use path::{Path, PathBuilder, PathCommand, Point};
pub use primitives::{CornerRadius, Rect};
