//! Per-frame command buffer
//!
//! Owns every frame arena and exposes the recording API. A frame follows a
//! fixed protocol:
//!
//! ```text
//! reset() → balanced push/pop, add, begin/end … → build(w, h) → flush(frame, sink)
//! ```
//!
//! Nothing on the recording path returns an error. Capacity exhaustion,
//! stack discipline violations and dangling references are counted in
//! [`FrameStats`] and logged once per frame.

use tessera_paint::{CornerRadius, GradientStop, Path, PathCommand, Point, Rect};

use crate::binner::{BinReport, TileBinner};
use crate::bounds::{shape_extent, Bounds, BoundsContext};
use crate::chain::{Modifier, ModifierStack, StackError, Warp, WarpStack};
use crate::clip::ClipStack;
use crate::config::BufferConfig;
use crate::error::{Result, TesseraError};
use crate::frame::{BufferKind, FrameSink, FRAMES_IN_FLIGHT};
use crate::group::{GroupRange, GroupTracker, MaskRange, OpenScope, ScopeError, ScopeKind};
use crate::polyline::{PolylineError, PolylineStore};
use crate::primitives::{
    flags, BooleanOp, GpuChainNode, GpuCommand, GpuGradientStop, GpuLattice, GpuPolylineHeader, ShapeType,
    LATTICE_POINTS,
};
use crate::provider::{GlyphAtlas, ImageId, TextureRegistry};
use crate::stats::{Fault, FrameStats};
use crate::stores::{GradientRange, GradientStopStore, LatticeStore};
use crate::style::ShapeStyle;

/// Chain heads stamped onto a command: (warp, modifier)
type Heads = (u32, u32);

pub struct CommandBuffer {
    config: BufferConfig,
    commands: Vec<GpuCommand>,
    warps: WarpStack,
    modifiers: ModifierStack,
    clips: ClipStack,
    groups: GroupTracker,
    polylines: PolylineStore,
    gradients: GradientStopStore,
    lattices: LatticeStore,
    binner: TileBinner,
    stats: FrameStats,
}

impl CommandBuffer {
    /// Allocate every arena at its configured capacity
    pub fn new(config: BufferConfig) -> Result<Self> {
        config.validate()?;
        tracing::debug!(
            max_commands = config.max_commands,
            max_tiles = config.max_tiles,
            max_tile_indices = config.max_tile_indices,
            "command buffer allocated"
        );
        Ok(Self {
            commands: Vec::with_capacity(config.max_commands),
            warps: WarpStack::new(config.chain_node_capacity()),
            modifiers: ModifierStack::new(config.chain_node_capacity()),
            clips: ClipStack::new(),
            groups: GroupTracker::new(config.max_commands),
            polylines: PolylineStore::new(config.max_polyline_points, config.max_polylines),
            gradients: GradientStopStore::new(config.max_gradient_stops),
            lattices: LatticeStore::new(config.max_lattices),
            binner: TileBinner::new(config.max_tiles, config.max_tile_indices, config.max_commands),
            stats: FrameStats::default(),
            config,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Frame protocol
    // ─────────────────────────────────────────────────────────────────────────

    /// Start a new frame. Every arena is truncated and every stack is forced
    /// back to depth 0; nothing carries over from the previous frame.
    pub fn reset(&mut self) {
        let unbalanced = self.warps.reset() | self.modifiers.reset() | self.clips.reset() | self.groups.reset();
        self.commands.clear();
        self.polylines.reset();
        self.gradients.reset();
        self.lattices.reset();
        self.stats.reset();
        if unbalanced {
            self.stats.record(Fault::UnbalancedReset);
        }
    }

    /// Bin the recorded commands into the tiles of a `width × height` target.
    /// Open stacks are reported but the frame is still binned.
    pub fn build(&mut self, width: u32, height: u32) -> BinReport {
        if self.warps.depth() + self.modifiers.depth() + self.clips.depth() + self.groups.depth() > 0 {
            self.stats.record(Fault::UnbalancedBuild);
        }
        let ctx = BoundsContext {
            polylines: &self.polylines,
            warps: &self.warps,
            modifiers: &self.modifiers,
            lattices: &self.lattices,
        };
        let report = self
            .binner
            .build(width, height, &self.commands, self.groups.ranges(), self.groups.masks(), &ctx);
        if report.grid_clamped {
            self.stats.record(Fault::TileGridOverflow);
        }
        self.stats.record_n(Fault::TileIndexOverflow, report.dropped_units);
        report
    }

    /// Hand every non-empty frame array to `sink` for slot `frame_index`
    pub fn flush<S: FrameSink + ?Sized>(&self, frame_index: usize, sink: &mut S) -> Result<()> {
        if frame_index >= FRAMES_IN_FLIGHT {
            return Err(TesseraError::InvalidFrameIndex {
                index: frame_index,
                frames_in_flight: FRAMES_IN_FLIGHT,
            });
        }
        let arrays: [(BufferKind, &[u8]); BufferKind::COUNT] = [
            (BufferKind::Commands, bytemuck::cast_slice(&self.commands)),
            (BufferKind::WarpNodes, bytemuck::cast_slice(self.warps.nodes())),
            (BufferKind::ModifierNodes, bytemuck::cast_slice(self.modifiers.nodes())),
            (BufferKind::Lattices, bytemuck::cast_slice(self.lattices.lattices())),
            (BufferKind::PolylineHeaders, bytemuck::cast_slice(self.polylines.headers())),
            (BufferKind::Points, bytemuck::cast_slice(self.polylines.points())),
            (BufferKind::Lengths, bytemuck::cast_slice(self.polylines.lengths())),
            (BufferKind::GradientStops, bytemuck::cast_slice(self.gradients.stops())),
            (BufferKind::TileOffsets, bytemuck::cast_slice(self.binner.tile_offsets())),
            (BufferKind::TileIndices, bytemuck::cast_slice(self.binner.tile_indices())),
        ];
        for (kind, bytes) in arrays {
            if !bytes.is_empty() {
                sink.write(frame_index, kind, bytes);
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stacks
    // ─────────────────────────────────────────────────────────────────────────

    pub fn push_warp(&mut self, warp: Warp) {
        if let Warp::Lattice { lattice, .. } = warp {
            if self.lattices.max_offset(lattice).is_none() {
                self.stats.record(Fault::MalformedReference);
            }
        }
        let result = self.warps.push(warp);
        self.check_stack(result, Fault::WarpOverflow, Fault::WarpUnderflow);
    }

    pub fn pop_warp(&mut self) {
        let result = self.warps.pop();
        self.check_stack(result, Fault::WarpOverflow, Fault::WarpUnderflow);
    }

    pub fn push_modifier(&mut self, modifier: Modifier) {
        let result = self.modifiers.push(modifier);
        self.check_stack(result, Fault::ModifierOverflow, Fault::ModifierUnderflow);
    }

    pub fn pop_modifier(&mut self) {
        let result = self.modifiers.pop();
        self.check_stack(result, Fault::ModifierOverflow, Fault::ModifierUnderflow);
    }

    /// Clip subsequent commands to `rect` (intersected with the current clip)
    pub fn push_clip(&mut self, rect: Rect) {
        let result = self.clips.push(rect);
        self.check_stack(result, Fault::ClipOverflow, Fault::ClipUnderflow);
    }

    pub fn pop_clip(&mut self) {
        let result = self.clips.pop();
        self.check_stack(result, Fault::ClipOverflow, Fault::ClipUnderflow);
    }

    fn check_stack(&mut self, result: std::result::Result<(), StackError>, overflow: Fault, underflow: Fault) {
        match result {
            Ok(()) => {}
            Err(StackError::Overflow) => self.stats.record(overflow),
            Err(StackError::Underflow) => self.stats.record(underflow),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Auxiliary data
    // ─────────────────────────────────────────────────────────────────────────

    /// Store gradient stops for use with [`crate::GradientFill`]
    pub fn add_gradient_stops(&mut self, stops: &[GradientStop]) -> Option<GradientRange> {
        let range = self.gradients.push_stops(stops);
        if range.is_none() && !stops.is_empty() {
            self.stats.record(Fault::GradientOverflow);
        }
        range
    }

    /// Store a lattice for use with [`Warp::Lattice`]
    pub fn add_lattice(&mut self, offsets: [[f32; 2]; LATTICE_POINTS]) -> Option<u32> {
        let index = self.lattices.push_lattice(offsets);
        if index.is_none() {
            self.stats.record(Fault::LatticeOverflow);
        }
        index
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a command under the current warp, modifier and clip state.
    /// Returns its index, or `None` if it was dropped or culled.
    pub fn add(&mut self, cmd: GpuCommand) -> Option<u32> {
        let current = (self.warps.head(), self.modifiers.head());
        if let Some(scope) = self.groups.text_scope() {
            if cmd.shape_type() != Some(ShapeType::Glyph) {
                // A text group spans its glyphs and nothing else
                self.stats.record(Fault::ScopeMismatch);
                return None;
            }
            // Glyphs ride on the text group's chains
            let captured = (scope.warp_head, scope.modifier_head);
            return self.insert(cmd.with_flags(flags::INTERNAL), (0, 0), captured);
        }
        if matches!(cmd.shape_type(), Some(ShapeType::Polyline | ShapeType::Polygon)) {
            let resolved = self
                .polylines
                .header(cmd.data[0])
                .is_some_and(|header| self.polylines.points_of(header).is_some());
            if !resolved {
                self.stats.record(Fault::MalformedReference);
            }
        }
        self.insert(cmd, current, current)
    }

    /// Record a command without capturing the warp chain. Markers go
    /// through here: they follow modifiers only.
    pub fn add_raw(&mut self, cmd: GpuCommand) -> Option<u32> {
        if self.groups.text_scope().is_some() {
            self.stats.record(Fault::ScopeMismatch);
            return None;
        }
        let heads = (0, self.modifiers.head());
        self.insert(cmd, heads, heads)
    }

    fn insert(&mut self, mut cmd: GpuCommand, heads: Heads, cull_heads: Heads) -> Option<u32> {
        if self.commands.len() >= self.config.max_commands {
            self.stats.record(Fault::CommandOverflow);
            return None;
        }
        if cmd.clip_rect().is_none() {
            if let Some(top) = self.clips.top() {
                cmd = cmd.with_clip_rect(top);
            }
        }
        if !cmd.is_marker() {
            cmd.set_chain_heads(cull_heads.0, cull_heads.1);
            if self.is_culled(&cmd) {
                self.stats.record_cull();
                return None;
            }
        }
        cmd.set_chain_heads(heads.0, heads.1);
        let index = self.commands.len() as u32;
        self.commands.push(cmd);
        Some(index)
    }

    /// Fully outside its clip, and no `Repeat` warp could bring it back
    fn is_culled(&self, cmd: &GpuCommand) -> bool {
        let Some(clip) = cmd.clip_rect() else {
            return false;
        };
        match self.bounds_context().expanded(cmd) {
            Bounds::Finite(rect) => !rect.intersects(&clip),
            Bounds::Unbounded | Bounds::Empty => false,
        }
    }

    fn bounds_context(&self) -> BoundsContext<'_> {
        BoundsContext {
            polylines: &self.polylines,
            warps: &self.warps,
            modifiers: &self.modifiers,
            lattices: &self.lattices,
        }
    }

    fn has_command_capacity(&mut self) -> bool {
        if self.commands.len() >= self.config.max_commands {
            self.stats.record(Fault::CommandOverflow);
            return false;
        }
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Shape factories
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_circle(&mut self, cx: f32, cy: f32, radius: f32, style: impl Into<ShapeStyle>) -> Option<u32> {
        self.add(style.into().apply(GpuCommand::circle(cx, cy, radius)))
    }

    pub fn add_rect(&mut self, rect: Rect, style: impl Into<ShapeStyle>) -> Option<u32> {
        self.add(style.into().apply(GpuCommand::rect(rect)))
    }

    /// Rounded rect with uniform (`f32`) or per-corner radii
    pub fn add_rounded_rect(
        &mut self,
        rect: Rect,
        radius: impl Into<CornerRadius>,
        style: impl Into<ShapeStyle>,
    ) -> Option<u32> {
        self.add(style.into().apply(GpuCommand::rounded_rect(rect, radius.into())))
    }

    /// Capsule from `from` to `to`, `thickness` wide
    pub fn add_line(&mut self, from: Point, to: Point, thickness: f32, style: impl Into<ShapeStyle>) -> Option<u32> {
        self.add(style.into().apply(GpuCommand::line(from, to, thickness)))
    }

    /// Open polyline through `points`, `thickness` wide
    pub fn add_polyline(&mut self, points: &[Point], thickness: f32, style: impl Into<ShapeStyle>) -> Option<u32> {
        if points.len() < 2 || !self.has_command_capacity() {
            return None;
        }
        let cursor = self.polylines.cursor();
        let (header, count, bounds) = self.store_points(points)?;
        let cmd = style.into().apply(GpuCommand::polyline(header, count, bounds, thickness));
        self.add_sealed(cmd, cursor, header)
    }

    /// Filled polygon (implicitly closed)
    pub fn add_polygon(&mut self, points: &[Point], style: impl Into<ShapeStyle>) -> Option<u32> {
        if points.len() < 3 || !self.has_command_capacity() {
            return None;
        }
        let cursor = self.polylines.cursor();
        let (header, count, bounds) = self.store_points(points)?;
        let cmd = style.into().apply(GpuCommand::polygon(header, count, bounds));
        self.add_sealed(cmd, cursor, header)
    }

    /// Cubic bezier, flattened into a polyline
    pub fn add_bezier(
        &mut self,
        from: Point,
        ctrl1: Point,
        ctrl2: Point,
        to: Point,
        thickness: f32,
        style: impl Into<ShapeStyle>,
    ) -> Option<u32> {
        if !self.has_command_capacity() {
            return None;
        }
        let cursor = self.polylines.cursor();
        let flattened = self
            .polylines
            .push_point(from)
            .and_then(|()| self.polylines.push_cubic(from, ctrl1, ctrl2, to));
        if let Err(err) = flattened {
            self.abandon_polyline(cursor, err);
            return None;
        }
        let (header, count, bounds) = self.seal_polyline(cursor)?;
        let cmd = style.into().apply(GpuCommand::polyline(header, count, bounds, thickness));
        self.add_sealed(cmd, cursor, header)
    }

    /// Quadratic bezier, flattened into a polyline
    pub fn add_quad_bezier(
        &mut self,
        from: Point,
        ctrl: Point,
        to: Point,
        thickness: f32,
        style: impl Into<ShapeStyle>,
    ) -> Option<u32> {
        if !self.has_command_capacity() {
            return None;
        }
        let cursor = self.polylines.cursor();
        let flattened = self
            .polylines
            .push_point(from)
            .and_then(|()| self.polylines.push_quad(from, ctrl, to));
        if let Err(err) = flattened {
            self.abandon_polyline(cursor, err);
            return None;
        }
        let (header, count, bounds) = self.seal_polyline(cursor)?;
        let cmd = style.into().apply(GpuCommand::polyline(header, count, bounds, thickness));
        self.add_sealed(cmd, cursor, header)
    }

    /// Stroke every subpath of `path` as its own polyline. Returns the
    /// number of commands recorded.
    pub fn add_path(&mut self, path: &Path, thickness: f32, style: impl Into<ShapeStyle>) -> usize {
        let style = style.into();
        let mut recorded = 0;
        let mut subpath: Option<u32> = None;
        let mut first = Point::ZERO;
        let mut last = Point::ZERO;

        for command in path.commands() {
            if let PathCommand::MoveTo(p) = *command {
                recorded += self.finish_subpath(subpath.take(), thickness, &style);
                first = p;
                last = p;
                continue;
            }
            let cursor = match subpath {
                Some(cursor) => cursor,
                None => {
                    let cursor = self.polylines.cursor();
                    if let Err(err) = self.polylines.push_point(last) {
                        self.abandon_polyline(cursor, err);
                        return recorded;
                    }
                    first = last;
                    subpath = Some(cursor);
                    cursor
                }
            };
            let step = match *command {
                PathCommand::LineTo(p) => self.polylines.push_point(p).map(|()| p),
                PathCommand::QuadTo { control, end } => self.polylines.push_quad(last, control, end).map(|()| end),
                PathCommand::CubicTo {
                    control1,
                    control2,
                    end,
                } => self
                    .polylines
                    .push_cubic(last, control1, control2, end)
                    .map(|()| end),
                PathCommand::Close => self.polylines.push_point(first).map(|()| first),
                PathCommand::MoveTo(_) => continue,
            };
            match step {
                Ok(p) => last = p,
                Err(err) => {
                    self.abandon_polyline(cursor, err);
                    return recorded;
                }
            }
            if matches!(command, PathCommand::Close) {
                recorded += self.finish_subpath(subpath.take(), thickness, &style);
            }
        }
        recorded + self.finish_subpath(subpath, thickness, &style)
    }

    fn finish_subpath(&mut self, cursor: Option<u32>, thickness: f32, style: &ShapeStyle) -> usize {
        let Some(cursor) = cursor else {
            return 0;
        };
        if self.polylines.cursor() - cursor < 2 {
            self.polylines.rewind(cursor);
            return 0;
        }
        let Some((header, count, bounds)) = self.seal_polyline(cursor) else {
            return 0;
        };
        let cmd = style.apply(GpuCommand::polyline(header, count, bounds, thickness));
        self.add_sealed(cmd, cursor, header).map_or(0, |_| 1)
    }

    /// Glyph quad with its UV rect looked up in `atlas`
    pub fn add_glyph(
        &mut self,
        atlas: &impl GlyphAtlas,
        glyph_id: u32,
        rect: Rect,
        style: impl Into<ShapeStyle>,
    ) -> Option<u32> {
        let Some(glyph) = atlas.glyph(glyph_id) else {
            self.stats.record(Fault::MalformedReference);
            return None;
        };
        self.add(style.into().apply(GpuCommand::glyph(rect, glyph.uv, glyph.page)))
    }

    /// Image quad sampling the bindless texture registered for `image`
    pub fn add_image(
        &mut self,
        textures: &impl TextureRegistry,
        image: ImageId,
        rect: Rect,
        style: impl Into<ShapeStyle>,
    ) -> Option<u32> {
        let Some(texture) = textures.texture_index(image) else {
            self.stats.record(Fault::MalformedReference);
            return None;
        };
        self.add(style.into().apply(GpuCommand::image(rect, texture, [0.0, 0.0, 1.0, 1.0])))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Polyline helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn store_points(&mut self, points: &[Point]) -> Option<(u32, u32, Rect)> {
        let Some(start) = self.polylines.allocate_points(points.len()) else {
            self.stats.record(Fault::PointOverflow);
            return None;
        };
        for (i, &p) in points.iter().enumerate() {
            self.polylines.set_point(start + i as u32, p);
        }
        self.seal_polyline(start)
    }

    /// Header for everything appended since `cursor`
    fn seal_polyline(&mut self, cursor: u32) -> Option<(u32, u32, Rect)> {
        let count = self.polylines.cursor() - cursor;
        match self.polylines.add_polyline_header(cursor, count) {
            Ok(header) => {
                let bounds = self.polylines.header(header)?.bounds();
                Some((header, count, bounds))
            }
            Err(err) => {
                self.abandon_polyline(cursor, err);
                None
            }
        }
    }

    /// Add a command drawing the run sealed at `cursor`. The run is released
    /// if the command is dropped or culled.
    fn add_sealed(&mut self, cmd: GpuCommand, cursor: u32, header: u32) -> Option<u32> {
        let index = self.add(cmd);
        if index.is_none() {
            self.polylines.discard(cursor, header);
        }
        index
    }

    fn abandon_polyline(&mut self, cursor: u32, err: PolylineError) {
        self.polylines.rewind(cursor);
        self.stats.record(match err {
            PolylineError::PointsFull => Fault::PointOverflow,
            PolylineError::HeadersFull => Fault::PolylineOverflow,
            PolylineError::InvalidRange => Fault::MalformedReference,
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Compound scopes
    // ─────────────────────────────────────────────────────────────────────────

    /// Open a boolean group. Children are combined with `op` and painted by
    /// the matching [`Self::end_group`].
    pub fn begin_group(&mut self, op: BooleanOp, smoothness: f32) -> Option<u32> {
        self.open_scope(
            ScopeKind::Group,
            GpuCommand::group_marker(ShapeType::GroupBegin, op, smoothness),
        )
    }

    pub fn end_group(&mut self, style: impl Into<ShapeStyle>) -> Option<u32> {
        let scope = self.close_scope(ScopeKind::Group)?;
        let begin = *self.commands.get(scope.start as usize)?;
        let op = begin.data[0];
        let smoothness = begin.uv[0];

        let mut marker = style.into().apply(GpuCommand::marker(ShapeType::GroupEnd));
        marker.uv[0] = smoothness;
        marker.data[0] = op;
        marker.data[1] = scope.start;
        let end = self.add_raw(marker)?;

        let end_cmd = self.commands[end as usize];
        let expansion = smoothness
            .max(end_cmd.stroke_width() / 2.0)
            .max(end_cmd.glow_radius() * 2.0)
            + end_cmd.soft_edge()
            + self.modifiers.expansion(end_cmd.modifier_head());
        self.close_range(ScopeKind::Group, scope.start, end, expansion);
        Some(end)
    }

    /// Open a morph group blending its children by `factor` (0..=1)
    pub fn begin_morph(&mut self, factor: f32) -> Option<u32> {
        self.open_scope(
            ScopeKind::Morph,
            GpuCommand::morph_marker(ShapeType::MorphBegin, factor),
        )
    }

    pub fn end_morph(&mut self, style: impl Into<ShapeStyle>) -> Option<u32> {
        let scope = self.close_scope(ScopeKind::Morph)?;
        let factor = self.commands.get(scope.start as usize)?.uv[1];

        let mut marker = style
            .into()
            .apply(GpuCommand::morph_marker(ShapeType::MorphEnd, factor));
        marker.data[1] = scope.start;
        let end = self.add_raw(marker)?;

        let end_cmd = self.commands[end as usize];
        let expansion = 2.0 * end_cmd.glow_radius()
            + end_cmd.soft_edge()
            + self.modifiers.expansion(end_cmd.modifier_head());
        self.close_range(ScopeKind::Morph, scope.start, end, expansion);
        Some(end)
    }

    /// Mask subsequent commands to a (rounded) rect until [`Self::pop_mask`]
    pub fn push_mask(&mut self, rect: Rect, radius: impl Into<CornerRadius>) -> Option<u32> {
        self.open_scope(ScopeKind::Mask, GpuCommand::mask_push(rect, radius.into()))
    }

    pub fn pop_mask(&mut self) -> Option<u32> {
        let scope = self.close_scope(ScopeKind::Mask)?;
        let mut marker = GpuCommand::marker(ShapeType::MaskPop);
        marker.data[1] = scope.start;
        let end = self.add_raw(marker)?;
        self.groups.record_mask(MaskRange {
            push: scope.start,
            pop: end,
        });
        Some(end)
    }

    /// Open a text group: glyphs added until [`Self::end_text_group`] are
    /// warped as one rigid run under the chains current at this call
    pub fn begin_text_group(&mut self) -> bool {
        if self.groups.text_scope().is_some() {
            self.stats.record(Fault::ScopeMismatch);
            return false;
        }
        let scope = OpenScope {
            kind: ScopeKind::Text,
            start: self.commands.len() as u32,
            warp_head: self.warps.head(),
            modifier_head: self.modifiers.head(),
        };
        if self.groups.begin(scope).is_err() {
            self.stats.record(Fault::ScopeOverflow);
            return false;
        }
        true
    }

    /// Emit the TextGroup command wrapping the glyphs recorded since
    /// [`Self::begin_text_group`]. Empty runs emit nothing.
    pub fn end_text_group(&mut self, style: impl Into<ShapeStyle>) -> Option<u32> {
        let scope = self.close_scope(ScopeKind::Text)?;
        let first = scope.start;
        let count = (self.commands.len() as u32).saturating_sub(first);

        let glyphs = self
            .commands
            .get(first as usize..)
            .unwrap_or_default()
            .iter()
            .filter(|cmd| cmd.has_flag(flags::INTERNAL) && cmd.shape_type() == Some(ShapeType::Glyph))
            .fold(Bounds::Empty, |acc, cmd| acc.union(shape_extent(cmd, &self.polylines)));
        let Bounds::Finite(bounds) = glyphs else {
            return None;
        };

        let cmd = style.into().apply(GpuCommand::text_group(bounds, first, count));
        let heads = (scope.warp_head, scope.modifier_head);
        self.insert(cmd, heads, heads)
    }

    fn open_scope(&mut self, kind: ScopeKind, marker: GpuCommand) -> Option<u32> {
        if self.groups.text_scope().is_some() {
            self.stats.record(Fault::ScopeMismatch);
            return None;
        }
        let start = self.commands.len() as u32;
        if self.groups.begin(OpenScope::new(kind, start)).is_err() {
            self.stats.record(Fault::ScopeOverflow);
            return None;
        }
        self.add_raw(marker)
    }

    /// `None` for discipline violations and for ends balancing an ignored begin
    fn close_scope(&mut self, kind: ScopeKind) -> Option<OpenScope> {
        match self.groups.peek_end(kind) {
            Ok(scope) => {
                self.groups.end();
                scope
            }
            Err(ScopeError::Underflow) => {
                self.stats.record(Fault::ScopeUnderflow);
                None
            }
            Err(ScopeError::Mismatch { open }) => {
                tracing::debug!(expected = ?kind, ?open, "mismatched scope end");
                self.stats.record(Fault::ScopeMismatch);
                None
            }
        }
    }

    /// Aggregate children of `start..end` into a binnable range
    fn close_range(&mut self, kind: ScopeKind, start: u32, end: u32, expansion: f32) {
        let ctx = self.bounds_context();
        let children = self.commands[start as usize + 1..end as usize]
            .iter()
            .filter(|cmd| !cmd.is_marker() && !cmd.has_flag(flags::INTERNAL))
            .fold(Bounds::Empty, |acc, cmd| acc.union(ctx.expanded(cmd)));
        let clip = self.commands[end as usize].clip_rect();
        let mut bounds = children
            .union(self.groups.nested_bounds(start, end))
            .inflate(expansion);
        if let Some(clip) = clip {
            bounds = bounds.union(Bounds::Finite(clip));
        }
        self.groups.record_range(GroupRange {
            kind,
            start,
            end,
            bounds,
            clip,
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Recorded commands
    pub fn count(&self) -> usize {
        self.commands.len()
    }

    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    pub fn warp_nodes(&self) -> &[GpuChainNode] {
        self.warps.nodes()
    }

    pub fn modifier_nodes(&self) -> &[GpuChainNode] {
        self.modifiers.nodes()
    }

    pub fn lattices(&self) -> &[GpuLattice] {
        self.lattices.lattices()
    }

    pub fn polyline_headers(&self) -> &[GpuPolylineHeader] {
        self.polylines.headers()
    }

    pub fn points(&self) -> &[[f32; 2]] {
        self.polylines.points()
    }

    pub fn lengths(&self) -> &[f32] {
        self.polylines.lengths()
    }

    pub fn gradient_stops(&self) -> &[GpuGradientStop] {
        self.gradients.stops()
    }

    pub fn group_ranges(&self) -> &[GroupRange] {
        self.groups.ranges()
    }

    pub fn mask_ranges(&self) -> &[MaskRange] {
        self.groups.masks()
    }

    pub fn tiles_x(&self) -> u32 {
        self.binner.tiles_x()
    }

    pub fn tiles_y(&self) -> u32 {
        self.binner.tiles_y()
    }

    pub fn tile_offsets(&self) -> &[u32] {
        self.binner.tile_offsets()
    }

    pub fn tile_indices(&self) -> &[u32] {
        self.binner.tile_indices()
    }

    /// Commands binned to tile `(tx, ty)` by the last build
    pub fn tile_commands(&self, tx: u32, ty: u32) -> &[u32] {
        self.binner.tile_commands(tx, ty)
    }

    /// Tile containing pixel `(x, y)` in the last build's grid
    pub fn tile_at(&self, x: f32, y: f32) -> Option<(u32, u32)> {
        self.binner.tile_at(x, y)
    }

    pub fn warp_depth(&self) -> usize {
        self.warps.depth()
    }

    pub fn modifier_depth(&self) -> usize {
        self.modifiers.depth()
    }

    pub fn clip_depth(&self) -> usize {
        self.clips.depth()
    }

    pub fn scope_depth(&self) -> usize {
        self.groups.depth()
    }

    pub fn warp_head(&self) -> u32 {
        self.warps.head()
    }

    pub fn modifier_head(&self) -> u32 {
        self.modifiers.head()
    }

    /// Effect-expanded bounds of a recorded command, warp displacement included
    pub fn expanded_bounds(&self, index: u32) -> Option<Bounds> {
        let cmd = self.commands.get(index as usize)?;
        Some(self.bounds_context().expanded(cmd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_paint::{Color, PathBuilder};

    fn buffer() -> CommandBuffer {
        CommandBuffer::new(BufferConfig {
            max_commands: 64,
            max_polyline_points: 1024,
            max_polylines: 16,
            max_tiles: 10_000,
            max_tile_indices: 100_000,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_add_stamps_heads_and_clip() {
        let mut buf = buffer();
        buf.push_warp(Warp::Wave {
            frequency: 1.0,
            amplitude: 2.0,
            phase: 0.0,
        });
        buf.push_modifier(Modifier::Feather { radius: 1.0 });
        buf.push_clip(Rect::new(0.0, 0.0, 100.0, 100.0));
        let idx = buf.add_circle(50.0, 50.0, 10.0, Color::RED).unwrap();
        let cmd = buf.commands()[idx as usize];
        assert_eq!((cmd.warp_head(), cmd.modifier_head()), (1, 1));
        assert_eq!(cmd.clip_rect(), Some(Rect::new(0.0, 0.0, 100.0, 100.0)));
    }

    #[test]
    fn test_markers_skip_warp_capture() {
        let mut buf = buffer();
        buf.push_warp(Warp::Wave {
            frequency: 1.0,
            amplitude: 2.0,
            phase: 0.0,
        });
        buf.push_modifier(Modifier::Offset { distance: 1.0 });
        let begin = buf.begin_group(BooleanOp::Union, 0.0).unwrap();
        let cmd = buf.commands()[begin as usize];
        assert_eq!((cmd.warp_head(), cmd.modifier_head()), (0, 1));
    }

    #[test]
    fn test_clip_culling() {
        let mut buf = buffer();
        buf.push_clip(Rect::new(0.0, 0.0, 50.0, 50.0));
        assert!(buf.add_circle(200.0, 200.0, 10.0, Color::RED).is_none());
        // Touching the clip edge is not outside it
        assert!(buf.add_circle(60.0, 25.0, 10.0, Color::RED).is_some());
        assert_eq!(buf.count(), 1);
        assert_eq!(buf.stats().culled_commands(), 1);

        // Warp displacement can reach into the clip
        buf.push_warp(Warp::Wave {
            frequency: 1.0,
            amplitude: 30.0,
            phase: 0.0,
        });
        assert!(buf.add_circle(80.0, 25.0, 5.0, Color::RED).is_some());
        buf.pop_warp();

        buf.push_warp(Warp::Repeat {
            spacing_x: 10.0,
            spacing_y: 10.0,
        });
        assert!(buf.add_circle(500.0, 500.0, 1.0, Color::RED).is_some());
    }

    #[test]
    fn test_group_bounds_include_smoothness_and_clip() {
        let mut buf = buffer();
        buf.begin_group(BooleanOp::SmoothUnion, 6.0);
        buf.add_circle(20.0, 20.0, 5.0, Color::RED);
        buf.add_circle(40.0, 20.0, 5.0, Color::RED);
        let end = buf
            .end_group(ShapeStyle::fill(Color::BLUE).with_clip(Rect::new(100.0, 100.0, 10.0, 10.0)))
            .unwrap();

        let range = buf.group_ranges()[0];
        assert_eq!((range.start, range.end), (0, end));
        let Bounds::Finite(bounds) = range.bounds else {
            panic!("expected finite group bounds");
        };
        // Children span 15..45 × 15..25, grown by the smoothness of 6
        assert!(bounds.contains(Point::new(9.0, 9.0)));
        assert!(bounds.contains(Point::new(51.0, 31.0)));
        // Clip of the closing command is unioned in
        assert!(bounds.contains(Point::new(110.0, 110.0)));
    }

    #[test]
    fn test_nested_group_bounds_propagate() {
        let mut buf = buffer();
        buf.begin_group(BooleanOp::Union, 0.0);
        buf.begin_morph(0.5);
        buf.add_circle(20.0, 20.0, 5.0, Color::RED);
        buf.end_morph(ShapeStyle::fill(Color::RED).with_glow(10.0));
        buf.end_group(Color::RED);

        let outer = buf.group_ranges()[1];
        let Bounds::Finite(bounds) = outer.bounds else {
            panic!("expected finite group bounds");
        };
        // The inner morph glow (2 × 10) must survive into the outer range
        assert!(bounds.contains(Point::new(-4.0, 20.0)));
    }

    #[test]
    fn test_scope_discipline() {
        let mut buf = buffer();
        buf.begin_group(BooleanOp::Union, 0.0);
        assert!(buf.end_morph(Color::RED).is_none());
        assert_eq!(buf.stats().count(Fault::ScopeMismatch), 1);
        assert!(buf.end_group(Color::RED).is_some());
        assert!(buf.end_group(Color::RED).is_none());
        assert_eq!(buf.stats().count(Fault::ScopeUnderflow), 1);
        assert_eq!(buf.scope_depth(), 0);
    }

    #[test]
    fn test_text_group_wraps_internal_glyphs() {
        let mut atlas = std::collections::HashMap::new();
        atlas.insert(
            7,
            crate::provider::AtlasGlyph {
                uv: [0.0, 0.0, 0.1, 0.1],
                page: crate::primitives::AtlasPage::Mono,
            },
        );

        let mut buf = buffer();
        buf.push_warp(Warp::Wave {
            frequency: 1.0,
            amplitude: 3.0,
            phase: 0.0,
        });
        assert!(buf.begin_text_group());
        buf.add_glyph(&atlas, 7, Rect::new(10.0, 10.0, 8.0, 12.0), Color::BLACK);
        buf.add_glyph(&atlas, 7, Rect::new(18.0, 10.0, 8.0, 12.0), Color::BLACK);
        assert!(buf.add_glyph(&atlas, 99, Rect::new(26.0, 10.0, 8.0, 12.0), Color::BLACK).is_none());
        let group = buf.end_text_group(Color::BLACK).unwrap();
        buf.pop_warp();

        let glyph = buf.commands()[0];
        assert!(glyph.has_flag(flags::INTERNAL));
        assert_eq!(glyph.warp_head(), 0);

        let text = buf.commands()[group as usize];
        assert_eq!(text.shape_type(), Some(ShapeType::TextGroup));
        assert_eq!(text.warp_head(), 1);
        assert_eq!(&text.data[..2], &[0, 2]);
        assert_eq!(text.geometry, [10.0, 10.0, 26.0, 22.0]);
        assert_eq!(buf.stats().malformed_references(), 1);
    }

    #[test]
    fn test_empty_text_group_emits_nothing() {
        let mut buf = buffer();
        buf.begin_text_group();
        assert!(buf.end_text_group(Color::BLACK).is_none());
        assert_eq!(buf.count(), 0);
        assert_eq!(buf.scope_depth(), 0);
    }

    #[test]
    fn test_bezier_is_flattened() {
        let mut buf = buffer();
        let idx = buf
            .add_bezier(
                Point::new(0.0, 0.0),
                Point::new(30.0, 60.0),
                Point::new(60.0, -60.0),
                Point::new(90.0, 0.0),
                2.0,
                Color::WHITE,
            )
            .unwrap();
        let cmd = buf.commands()[idx as usize];
        assert_eq!(cmd.shape_type(), Some(ShapeType::Polyline));
        let header = buf.polyline_headers()[cmd.data[0] as usize];
        assert!(header.count > 30);
        assert_eq!(buf.points()[header.start as usize], [0.0, 0.0]);
        assert!(buf.lengths().windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_path_subpaths_become_polylines() {
        let mut buf = buffer();
        let path = PathBuilder::new()
            .move_to(0.0, 0.0)
            .line_to(10.0, 0.0)
            .line_to(10.0, 10.0)
            .close()
            .move_to(50.0, 50.0)
            .quad_to(60.0, 40.0, 70.0, 50.0)
            .move_to(90.0, 90.0)
            .build();
        assert_eq!(buf.add_path(&path, 1.0, Color::WHITE), 2);
        let first = buf.polyline_headers()[0];
        assert_eq!(first.count, 4);
        assert!((first.total_length - (20.0 + 200f32.sqrt())).abs() < 1e-4);
    }

    #[test]
    fn test_point_overflow_is_counted() {
        let mut buf = CommandBuffer::new(BufferConfig {
            max_polyline_points: 4,
            ..Default::default()
        })
        .unwrap();
        let points = [Point::new(0.0, 0.0), Point::new(1.0, 1.0), Point::new(2.0, 0.0)];
        assert!(buf.add_polyline(&points, 1.0, Color::WHITE).is_some());
        assert!(buf.add_polyline(&points, 1.0, Color::WHITE).is_none());
        assert_eq!(buf.stats().count(Fault::PointOverflow), 1);
        assert_eq!(buf.points().len(), 3);
    }

    #[test]
    fn test_dangling_polyline_falls_back_to_clip() {
        let mut buf = buffer();
        let clip = Rect::new(16.0, 16.0, 16.0, 16.0);
        let idx = buf
            .add(GpuCommand::polygon(9, 3, Rect::ZERO).with_clip_rect(clip))
            .unwrap();
        assert_eq!(buf.stats().malformed_references(), 1);
        buf.build(64, 64);
        assert_eq!(buf.tile_commands(2, 2), &[idx]);
        assert_eq!(buf.tile_commands(3, 3), &[idx]);
        assert!(buf.tile_commands(0, 0).is_empty());
    }

    #[test]
    fn test_mask_is_not_a_group_range() {
        let mut buf = buffer();
        let push = buf.push_mask(Rect::new(0.0, 0.0, 16.0, 16.0), 4.0).unwrap();
        buf.add_circle(40.0, 40.0, 30.0, Color::RED);
        let pop = buf.pop_mask().unwrap();

        assert!(buf.group_ranges().is_empty());
        assert_eq!(buf.mask_ranges(), &[MaskRange { push, pop }]);
        assert_eq!(buf.commands()[pop as usize].data[1], push);
    }

    #[test]
    fn test_text_group_spans_only_glyphs() {
        let mut atlas = std::collections::HashMap::new();
        atlas.insert(
            1,
            crate::provider::AtlasGlyph {
                uv: [0.0, 0.0, 0.1, 0.1],
                page: crate::primitives::AtlasPage::Mono,
            },
        );

        let mut buf = buffer();
        assert!(buf.begin_text_group());
        buf.add_glyph(&atlas, 1, Rect::new(10.0, 10.0, 8.0, 12.0), Color::BLACK);
        assert!(buf.add_circle(30.0, 30.0, 4.0, Color::RED).is_none());
        assert!(buf.begin_group(BooleanOp::Union, 0.0).is_none());
        assert!(!buf.begin_text_group());
        buf.add_glyph(&atlas, 1, Rect::new(18.0, 10.0, 8.0, 12.0), Color::BLACK);
        let group = buf.end_text_group(Color::BLACK).unwrap();

        assert_eq!(buf.stats().count(Fault::ScopeMismatch), 3);
        assert_eq!(buf.scope_depth(), 0);
        let text = buf.commands()[group as usize];
        assert_eq!(&text.data[..2], &[0, 2]);
        assert!(buf.commands()[..group as usize]
            .iter()
            .all(|cmd| cmd.shape_type() == Some(ShapeType::Glyph)));
    }

    #[test]
    fn test_culled_polyline_releases_its_points() {
        let mut buf = buffer();
        buf.push_clip(Rect::new(0.0, 0.0, 50.0, 50.0));
        let far = [Point::new(500.0, 500.0), Point::new(600.0, 520.0)];
        assert!(buf.add_polyline(&far, 2.0, Color::WHITE).is_none());
        assert!(buf.add_polygon(&[far[0], far[1], Point::new(550.0, 600.0)], Color::WHITE).is_none());
        assert!(buf
            .add_bezier(far[0], far[1], far[0], far[1], 1.0, Color::WHITE)
            .is_none());
        assert!(buf.points().is_empty());
        assert!(buf.polyline_headers().is_empty());
        assert_eq!(buf.stats().culled_commands(), 3);

        let near = [Point::new(10.0, 10.0), Point::new(20.0, 20.0)];
        let idx = buf.add_polyline(&near, 2.0, Color::WHITE).unwrap();
        assert_eq!(buf.commands()[idx as usize].data[0], 0);
        assert_eq!(buf.points().len(), 2);
    }
}
