//! Conservative command extents
//!
//! Every estimate here may over-cover but must never under-cover what the
//! shader can touch: the binner trusts these rects to decide tile residency.

use tessera_paint::{Point, Rect};

use crate::chain::{ModifierStack, WarpStack};
use crate::polyline::PolylineStore;
use crate::primitives::{GpuCommand, ShapeType};
use crate::stores::LatticeStore;

/// Safety margin around text group glyph unions
pub const TEXT_GROUP_PAD: f32 = 2.0;

/// Screen-space extent of a command
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Bounds {
    Finite(Rect),
    /// Can reach anywhere inside its clip (or the screen)
    Unbounded,
    /// Covers nothing (markers, empty compounds)
    Empty,
}

impl Bounds {
    fn from_rect(rect: Rect) -> Self {
        if rect.is_finite() {
            Bounds::Finite(rect)
        } else {
            Bounds::Unbounded
        }
    }

    pub fn union(self, other: Bounds) -> Bounds {
        match (self, other) {
            (Bounds::Unbounded, _) | (_, Bounds::Unbounded) => Bounds::Unbounded,
            (Bounds::Empty, b) | (b, Bounds::Empty) => b,
            (Bounds::Finite(a), Bounds::Finite(b)) => Bounds::Finite(a.union(&b)),
        }
    }

    pub fn inflate(self, amount: f32) -> Bounds {
        match self {
            Bounds::Finite(rect) => Bounds::from_rect(rect.inflate(amount)),
            other => other,
        }
    }
}

/// Axis-aligned extent of a rect rotated about its center
fn rotated_extent(center: Point, half_width: f32, half_height: f32, angle: f32) -> Rect {
    if angle == 0.0 {
        return Rect::from_center(center, half_width, half_height);
    }
    let (sin, cos) = angle.sin_cos();
    let ex = (half_width * cos).abs() + (half_height * sin).abs();
    let ey = (half_width * sin).abs() + (half_height * cos).abs();
    Rect::from_center(center, ex, ey)
}

/// Geometry-only extent, before paint effects and chains
pub fn shape_extent(cmd: &GpuCommand, polylines: &PolylineStore) -> Bounds {
    let [g0, g1, g2, g3] = cmd.geometry;
    let Some(shape) = cmd.shape_type() else {
        return Bounds::Unbounded;
    };
    let rect = match shape {
        ShapeType::Circle => Rect::from_center(Point::new(g0, g1), g2.abs(), g2.abs()),
        ShapeType::Rect | ShapeType::RoundedRect | ShapeType::Glyph | ShapeType::Image => {
            rotated_extent(Point::new(g0, g1), g2.abs(), g3.abs(), cmd.rotation())
        }
        ShapeType::Line => Rect::from_points(Point::new(g0, g1), Point::new(g2, g3)).inflate(cmd.radii[0]),
        ShapeType::Polyline | ShapeType::Polygon => {
            let Some(header) = polylines.header(cmd.data[0]) else {
                return Bounds::Unbounded;
            };
            if polylines.points_of(header).is_none() {
                return Bounds::Unbounded;
            }
            let thickness = if shape == ShapeType::Polyline { cmd.radii[0] } else { 0.0 };
            header.bounds().inflate(thickness)
        }
        ShapeType::TextGroup => Rect::from_min_max(g0, g1, g2, g3).inflate(TEXT_GROUP_PAD),
        _ => return Bounds::Empty,
    };
    Bounds::from_rect(rect)
}

/// Paint growth of a command: full stroke width, twice the glow and the soft edge
pub fn effect_padding(cmd: &GpuCommand) -> f32 {
    cmd.stroke_width() + 2.0 * cmd.glow_radius() + cmd.soft_edge()
}

/// Everything needed to expand a command's extent by its effects and chains
pub struct BoundsContext<'a> {
    pub polylines: &'a PolylineStore,
    pub warps: &'a WarpStack,
    pub modifiers: &'a ModifierStack,
    pub lattices: &'a LatticeStore,
}

impl BoundsContext<'_> {
    /// Outward growth beyond the shape extent under the warp chain at `warp_head`
    pub fn inflation(&self, cmd: &GpuCommand, warp_head: u32) -> f32 {
        effect_padding(cmd)
            + self.modifiers.expansion(cmd.modifier_head())
            + self.warps.estimate_displacement(warp_head, self.lattices)
    }

    /// Effect-expanded bounds including the command's own warp displacement
    pub fn expanded(&self, cmd: &GpuCommand) -> Bounds {
        self.expanded_with_warp(cmd, cmd.warp_head())
    }

    /// As [`Self::expanded`], under an explicit warp chain
    pub fn expanded_with_warp(&self, cmd: &GpuCommand, warp_head: u32) -> Bounds {
        if self.warps.contains_repeat(warp_head) {
            return Bounds::Unbounded;
        }
        shape_extent(cmd, self.polylines).inflate(self.inflation(cmd, warp_head))
    }
}
