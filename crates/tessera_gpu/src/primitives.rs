//! GPU command records
//!
//! Defines GPU-ready data structures that match the compute shader's storage
//! buffer layouts. All structures use `#[repr(C)]` and implement
//! `bytemuck::Pod` for safe GPU buffer copies.

use tessera_paint::{BlendMode, Color, CornerRadius, GradientKind, Point, Rect};

/// Clip bounds meaning "no clip" (large bounds that won't clip anything)
pub const NO_CLIP_BOUNDS: [f32; 4] = [-10000.0, -10000.0, 100000.0, 100000.0];

/// Shape types (must match shader constants)
#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShapeType {
    /// geometry: (cx, cy, radius, 0)
    #[default]
    Circle = 0,
    /// geometry: (cx, cy, half_width, half_height), rotation in effects.w
    Rect = 1,
    /// Rect plus per-corner radii
    RoundedRect = 2,
    /// geometry: (x0, y0, x1, y1), half thickness in radii.x
    Line = 3,
    /// Stroked polyline; data: (header index, point count), half thickness in radii.x
    Polyline = 4,
    /// Filled polygon; data: (header index, point count)
    Polygon = 5,
    /// Atlas glyph; geometry like Rect, uv = atlas rect
    Glyph = 6,
    /// Rigid run of internal glyphs; geometry: (min_x, min_y, max_x, max_y),
    /// data: (first glyph, glyph count)
    TextGroup = 7,
    /// Bindless image; geometry like Rect, uv = source rect, data.x = texture index
    Image = 8,
    GroupBegin = 9,
    GroupEnd = 10,
    MorphBegin = 11,
    MorphEnd = 12,
    /// geometry like Rect (mask shape), radii = mask corner radii
    MaskPush = 13,
    MaskPop = 14,
}

impl ShapeType {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => ShapeType::Circle,
            1 => ShapeType::Rect,
            2 => ShapeType::RoundedRect,
            3 => ShapeType::Line,
            4 => ShapeType::Polyline,
            5 => ShapeType::Polygon,
            6 => ShapeType::Glyph,
            7 => ShapeType::TextGroup,
            8 => ShapeType::Image,
            9 => ShapeType::GroupBegin,
            10 => ShapeType::GroupEnd,
            11 => ShapeType::MorphBegin,
            12 => ShapeType::MorphEnd,
            13 => ShapeType::MaskPush,
            14 => ShapeType::MaskPop,
            _ => return None,
        })
    }

    /// Control markers delimit compound ranges and have no geometry of their own
    pub fn is_marker(self) -> bool {
        matches!(
            self,
            ShapeType::GroupBegin
                | ShapeType::GroupEnd
                | ShapeType::MorphBegin
                | ShapeType::MorphEnd
                | ShapeType::MaskPush
                | ShapeType::MaskPop
        )
    }
}

/// Boolean CSG operators for groups (must match shader constants)
#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BooleanOp {
    #[default]
    Union = 0,
    Intersect = 1,
    Subtract = 2,
    SmoothUnion = 3,
    SmoothIntersect = 4,
    SmoothSubtract = 5,
}

/// Glyph atlas page selector, packed into the command flags
#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AtlasPage {
    /// Single-channel coverage atlas
    #[default]
    Mono = 0,
    /// RGBA atlas (color emoji)
    Color = 1,
    /// Distance-field atlas
    Sdf = 2,
}

/// Command flag bits (`type_info.y`)
pub mod flags {
    /// Trim parameters in `trim.xy` are active
    pub const TRIM: u32 = 1 << 0;
    /// Dash parameters in `trim.zw` are active
    pub const DASH: u32 = 1 << 1;
    /// Referenced by a wrapping command, never rendered directly
    pub const INTERNAL: u32 = 1 << 2;

    pub const ATLAS_SHIFT: u32 = 3;
    pub const ATLAS_MASK: u32 = 0b11 << ATLAS_SHIFT;

    pub const GRADIENT_SHIFT: u32 = 8;
    pub const GRADIENT_MASK: u32 = 0b11 << GRADIENT_SHIFT;

    pub const BLEND_SHIFT: u32 = 12;
    pub const BLEND_MASK: u32 = 0xF << BLEND_SHIFT;
}

/// A draw command ready for the tile compute shader (matches shader `Command` struct)
///
/// Memory layout:
/// - geometry: `vec4<f32>`       (16 bytes) - shape geometry, see [`ShapeType`]
/// - radii: `vec4<f32>`          (16 bytes) - corner radii (tl, tr, br, bl) or half thickness
/// - uv: `vec4<f32>`             (16 bytes) - atlas/image rect, or group (smoothness, morph factor)
/// - gradient: `vec4<f32>`       (16 bytes) - gradient params, see [`GradientKind`]
/// - fill_color: `vec4<f32>`     (16 bytes)
/// - stroke_color: `vec4<f32>`   (16 bytes)
/// - effects: `vec4<f32>`        (16 bytes) - (stroke_width, glow_radius, soft_edge, rotation)
/// - clip_bounds: `vec4<f32>`    (16 bytes) - (x, y, width, height), [`NO_CLIP_BOUNDS`] = none
/// - trim: `vec4<f32>`           (16 bytes) - (trim_start, trim_end, dash_length, dash_gap)
/// - type_info: `vec4<u32>`      (16 bytes) - (shape_type, flags, warp_head, modifier_head)
/// - data: `vec4<u32>`           (16 bytes) - (data_index, data_count, gradient_start, gradient_count)
///   Total: 176 bytes
///
/// Chain heads are 1-based indices into the frame's warp/modifier node
/// buffers; 0 means the chain is empty.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuCommand {
    pub geometry: [f32; 4],
    pub radii: [f32; 4],
    pub uv: [f32; 4],
    pub gradient: [f32; 4],
    pub fill_color: [f32; 4],
    pub stroke_color: [f32; 4],
    pub effects: [f32; 4],
    pub clip_bounds: [f32; 4],
    pub trim: [f32; 4],
    pub type_info: [u32; 4],
    pub data: [u32; 4],
}

const _: () = assert!(std::mem::size_of::<GpuCommand>() == 176);

impl Default for GpuCommand {
    fn default() -> Self {
        Self {
            geometry: [0.0; 4],
            radii: [0.0; 4],
            uv: [0.0, 0.0, 1.0, 1.0],
            gradient: [0.0; 4],
            fill_color: [1.0, 1.0, 1.0, 1.0],
            stroke_color: [0.0; 4],
            effects: [0.0; 4],
            clip_bounds: NO_CLIP_BOUNDS,
            trim: [0.0, 1.0, 0.0, 0.0],
            type_info: [ShapeType::Circle as u32, 0, 0, 0],
            data: [0; 4],
        }
    }
}

impl GpuCommand {
    fn with_type(shape_type: ShapeType) -> Self {
        let mut cmd = Self::default();
        cmd.type_info[0] = shape_type as u32;
        cmd
    }

    /// Create a circle command
    pub fn circle(cx: f32, cy: f32, radius: f32) -> Self {
        Self {
            geometry: [cx, cy, radius.abs(), 0.0],
            ..Self::with_type(ShapeType::Circle)
        }
    }

    /// Create an axis-aligned rectangle command (rotate with [`Self::with_rotation`])
    pub fn rect(rect: Rect) -> Self {
        let center = rect.center();
        Self {
            geometry: [center.x, center.y, rect.width / 2.0, rect.height / 2.0],
            ..Self::with_type(ShapeType::Rect)
        }
    }

    /// Create a rounded rectangle command with per-corner radii
    pub fn rounded_rect(rect: Rect, radius: CornerRadius) -> Self {
        Self {
            radii: radius.to_array(),
            type_info: [ShapeType::RoundedRect as u32, 0, 0, 0],
            ..Self::rect(rect)
        }
    }

    /// Create a capsule line segment of the given thickness
    pub fn line(from: Point, to: Point, thickness: f32) -> Self {
        Self {
            geometry: [from.x, from.y, to.x, to.y],
            radii: [thickness.abs() / 2.0, 0.0, 0.0, 0.0],
            ..Self::with_type(ShapeType::Line)
        }
    }

    /// Create a stroked polyline referencing a polyline header
    pub fn polyline(header: u32, point_count: u32, bounds: Rect, thickness: f32) -> Self {
        Self {
            geometry: [bounds.x, bounds.y, bounds.right(), bounds.bottom()],
            radii: [thickness.abs() / 2.0, 0.0, 0.0, 0.0],
            data: [header, point_count, 0, 0],
            ..Self::with_type(ShapeType::Polyline)
        }
    }

    /// Create a filled polygon referencing a polyline header
    pub fn polygon(header: u32, point_count: u32, bounds: Rect) -> Self {
        Self {
            geometry: [bounds.x, bounds.y, bounds.right(), bounds.bottom()],
            data: [header, point_count, 0, 0],
            ..Self::with_type(ShapeType::Polygon)
        }
    }

    /// Create an atlas glyph quad
    pub fn glyph(rect: Rect, uv: [f32; 4], page: AtlasPage) -> Self {
        let mut cmd = Self {
            uv,
            type_info: [ShapeType::Glyph as u32, 0, 0, 0],
            ..Self::rect(rect)
        };
        cmd.type_info[1] |= (page as u32) << flags::ATLAS_SHIFT;
        cmd
    }

    /// Create a text group spanning `[first_glyph, first_glyph + glyph_count)`
    pub fn text_group(bounds: Rect, first_glyph: u32, glyph_count: u32) -> Self {
        Self {
            geometry: [bounds.x, bounds.y, bounds.right(), bounds.bottom()],
            data: [first_glyph, glyph_count, 0, 0],
            ..Self::with_type(ShapeType::TextGroup)
        }
    }

    /// Create an image quad sampling a bindless texture
    pub fn image(rect: Rect, texture_index: u32, uv: [f32; 4]) -> Self {
        Self {
            uv,
            type_info: [ShapeType::Image as u32, 0, 0, 0],
            data: [texture_index, 0, 0, 0],
            ..Self::rect(rect)
        }
    }

    /// Create a control marker
    pub fn marker(shape_type: ShapeType) -> Self {
        debug_assert!(shape_type.is_marker());
        Self {
            fill_color: [0.0; 4],
            ..Self::with_type(shape_type)
        }
    }

    /// Create a group begin/end marker carrying the boolean operator
    pub fn group_marker(shape_type: ShapeType, op: BooleanOp, smoothness: f32) -> Self {
        Self {
            uv: [smoothness.max(0.0), 0.0, 0.0, 0.0],
            data: [op as u32, 0, 0, 0],
            ..Self::marker(shape_type)
        }
    }

    /// Create a morph begin/end marker carrying the blend factor
    pub fn morph_marker(shape_type: ShapeType, factor: f32) -> Self {
        Self {
            uv: [0.0, factor.clamp(0.0, 1.0), 0.0, 0.0],
            ..Self::marker(shape_type)
        }
    }

    /// Create a mask push marker describing the mask shape
    pub fn mask_push(rect: Rect, radius: CornerRadius) -> Self {
        let center = rect.center();
        Self {
            geometry: [center.x, center.y, rect.width / 2.0, rect.height / 2.0],
            radii: radius.to_array(),
            ..Self::marker(ShapeType::MaskPush)
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builders
    // ─────────────────────────────────────────────────────────────────────────

    /// Set 2D rotation in radians (rect-like shapes)
    pub fn with_rotation(mut self, angle_rad: f32) -> Self {
        self.effects[3] = angle_rad;
        self
    }

    pub fn with_fill(mut self, color: Color) -> Self {
        self.fill_color = color.to_array();
        self
    }

    pub fn with_stroke(mut self, color: Color, width: f32) -> Self {
        self.stroke_color = color.to_array();
        self.effects[0] = width.max(0.0);
        self
    }

    pub fn with_glow(mut self, radius: f32) -> Self {
        self.effects[1] = radius.max(0.0);
        self
    }

    pub fn with_soft_edge(mut self, width: f32) -> Self {
        self.effects[2] = width.max(0.0);
        self
    }

    /// Set rectangular clip region
    pub fn with_clip_rect(mut self, rect: Rect) -> Self {
        self.clip_bounds = rect.to_array();
        self
    }

    /// Clear clip region
    pub fn with_no_clip(mut self) -> Self {
        self.clip_bounds = NO_CLIP_BOUNDS;
        self
    }

    /// Draw only the `[start, end]` fraction of the outline (by arc length)
    pub fn with_trim(mut self, start: f32, end: f32) -> Self {
        self.trim[0] = start.clamp(0.0, 1.0);
        self.trim[1] = end.clamp(0.0, 1.0);
        self.type_info[1] |= flags::TRIM;
        self
    }

    /// Dash the outline with `length` on / `gap` off (pixels of arc length)
    pub fn with_dash(mut self, length: f32, gap: f32) -> Self {
        self.trim[2] = length.max(0.0);
        self.trim[3] = gap.max(0.0);
        self.type_info[1] |= flags::DASH;
        self
    }

    /// Fill with a gradient whose stops live at `[start, start + count)` in the stop buffer
    pub fn with_gradient(mut self, kind: GradientKind, params: [f32; 4], start: u32, count: u32) -> Self {
        self.gradient = params;
        self.data[2] = start;
        self.data[3] = count;
        self.type_info[1] =
            (self.type_info[1] & !flags::GRADIENT_MASK) | ((kind as u32) << flags::GRADIENT_SHIFT);
        self
    }

    pub fn with_blend_mode(mut self, mode: BlendMode) -> Self {
        self.type_info[1] =
            (self.type_info[1] & !flags::BLEND_MASK) | ((mode as u32) << flags::BLEND_SHIFT);
        self
    }

    pub fn with_flags(mut self, bits: u32) -> Self {
        self.type_info[1] |= bits;
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Decoded shape type; unknown values decode as `None`
    pub fn shape_type(&self) -> Option<ShapeType> {
        ShapeType::from_u32(self.type_info[0])
    }

    pub fn is_marker(&self) -> bool {
        self.shape_type().is_some_and(ShapeType::is_marker)
    }

    pub fn flags(&self) -> u32 {
        self.type_info[1]
    }

    pub fn has_flag(&self, bits: u32) -> bool {
        self.type_info[1] & bits == bits
    }

    pub fn warp_head(&self) -> u32 {
        self.type_info[2]
    }

    pub fn modifier_head(&self) -> u32 {
        self.type_info[3]
    }

    pub(crate) fn set_chain_heads(&mut self, warp_head: u32, modifier_head: u32) {
        self.type_info[2] = warp_head;
        self.type_info[3] = modifier_head;
    }

    pub fn stroke_width(&self) -> f32 {
        self.effects[0]
    }

    pub fn glow_radius(&self) -> f32 {
        self.effects[1]
    }

    pub fn soft_edge(&self) -> f32 {
        self.effects[2]
    }

    pub fn rotation(&self) -> f32 {
        self.effects[3]
    }

    pub fn gradient_kind(&self) -> GradientKind {
        GradientKind::from_bits((self.type_info[1] & flags::GRADIENT_MASK) >> flags::GRADIENT_SHIFT)
    }

    pub fn blend_mode(&self) -> BlendMode {
        BlendMode::from_bits((self.type_info[1] & flags::BLEND_MASK) >> flags::BLEND_SHIFT)
    }

    pub fn atlas_page(&self) -> AtlasPage {
        match (self.type_info[1] & flags::ATLAS_MASK) >> flags::ATLAS_SHIFT {
            1 => AtlasPage::Color,
            2 => AtlasPage::Sdf,
            _ => AtlasPage::Mono,
        }
    }

    /// Explicit clip rect, `None` when the sentinel is set
    pub fn clip_rect(&self) -> Option<Rect> {
        if self.clip_bounds == NO_CLIP_BOUNDS {
            None
        } else {
            let [x, y, w, h] = self.clip_bounds;
            Some(Rect::new(x, y, w, h))
        }
    }
}

/// Warp/modifier chain node (matches shader `ChainNode` struct)
///
/// Memory layout:
/// - prev: `u32`            - 1-based index of the next-outer node, 0 = end of chain
/// - kind: `u32`            - warp or modifier kind (shader constants)
/// - aux: `u32`             - kind-specific index (lattice slot)
/// - _pad: `u32`
/// - params: `vec4<f32>`    (16 bytes)
/// - params2: `vec4<f32>`   (16 bytes)
///   Total: 48 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuChainNode {
    pub prev: u32,
    pub kind: u32,
    pub aux: u32,
    pub _pad: u32,
    pub params: [f32; 4],
    pub params2: [f32; 4],
}

const _: () = assert!(std::mem::size_of::<GpuChainNode>() == 48);

/// Polyline header (matches shader `PolylineHeader` struct, 32 bytes)
///
/// Points live at `points[start..start + count]`, cumulative arc length at
/// `lengths[start..start + count]` with `lengths[start] == 0`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuPolylineHeader {
    pub start: u32,
    pub count: u32,
    pub total_length: f32,
    pub _pad: f32,
    pub bounds_min: [f32; 2],
    pub bounds_max: [f32; 2],
}

const _: () = assert!(std::mem::size_of::<GpuPolylineHeader>() == 32);

impl GpuPolylineHeader {
    pub fn bounds(&self) -> Rect {
        Rect::from_min_max(
            self.bounds_min[0],
            self.bounds_min[1],
            self.bounds_max[0],
            self.bounds_max[1],
        )
    }
}

/// Gradient stop (matches shader `GradientStop` struct, 32 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuGradientStop {
    pub color: [f32; 4],
    /// (offset, 0, 0, 0)
    pub offset: [f32; 4],
}

/// Control points per lattice (4 × 4 grid)
pub const LATTICE_POINTS: usize = 16;

/// Free-form deformation lattice: per-control-point displacement in pixels
/// at unit scale (128 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuLattice {
    pub offsets: [[f32; 2]; LATTICE_POINTS],
}

impl GpuLattice {
    /// Largest control-point displacement
    pub fn max_offset(&self) -> f32 {
        self.offsets
            .iter()
            .map(|[x, y]| (x * x + y * y).sqrt())
            .fold(0.0, f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_command_geometry() {
        let cmd = GpuCommand::rect(Rect::new(10.0, 20.0, 100.0, 50.0)).with_rotation(0.5);
        assert_eq!(cmd.geometry, [60.0, 45.0, 50.0, 25.0]);
        assert_eq!(cmd.shape_type(), Some(ShapeType::Rect));
        assert_eq!(cmd.rotation(), 0.5);
        assert!(cmd.clip_rect().is_none());
    }

    #[test]
    fn test_flag_packing() {
        let cmd = GpuCommand::glyph(Rect::new(0.0, 0.0, 8.0, 8.0), [0.0; 4], AtlasPage::Color)
            .with_blend_mode(BlendMode::Screen)
            .with_gradient(GradientKind::Radial, [0.0; 4], 3, 2)
            .with_trim(0.25, 0.75)
            .with_flags(flags::INTERNAL);

        assert_eq!(cmd.atlas_page(), AtlasPage::Color);
        assert_eq!(cmd.blend_mode(), BlendMode::Screen);
        assert_eq!(cmd.gradient_kind(), GradientKind::Radial);
        assert!(cmd.has_flag(flags::TRIM | flags::INTERNAL));
        assert!(!cmd.has_flag(flags::DASH));
        assert_eq!(&cmd.data[2..], &[3, 2]);
    }

    #[test]
    fn test_markers() {
        let begin = GpuCommand::group_marker(ShapeType::GroupBegin, BooleanOp::Subtract, 4.0);
        assert!(begin.is_marker());
        assert_eq!(begin.data[0], BooleanOp::Subtract as u32);
        assert!(!GpuCommand::circle(0.0, 0.0, 1.0).is_marker());
    }

    #[test]
    fn test_lattice_max_offset() {
        let mut lattice = GpuLattice::default();
        lattice.offsets[5] = [3.0, 4.0];
        lattice.offsets[9] = [-1.0, 0.0];
        assert_eq!(lattice.max_offset(), 5.0);
    }
}
