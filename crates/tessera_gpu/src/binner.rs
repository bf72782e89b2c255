//! 8×8 tile binning
//!
//! For every screen tile, collects the ordered, duplicate-free list of
//! commands that can affect it and packs the lists into two flat arrays:
//! `tile_offsets[tile_count + 1]` (prefix sums) and `tile_indices`.
//!
//! Work per build is proportional to what was touched: tile counters are
//! cleared only for tiles used by the previous build, and per-unit duplicate
//! suppression uses generation stamps instead of clearing a visited array.
//!
//! Assignment happens one *unit* at a time in z-order. A unit is either a
//! standalone command or a whole compound range. When the index buffer
//! cannot hold a unit, the whole unit is dropped and later units may still
//! fit, so earlier commands win and compounds are never split.
//!
//! Mask scopes are not units. Their push and pop markers are binned to the
//! tiles of the mask shape and every command between them is binned on its
//! own, limited to those tiles. Room for the pop marker is reserved when the
//! push is placed, so a mask is never left open in a tile.

use smallvec::SmallVec;
use tessera_paint::{Point, Rect};

use crate::bounds::{Bounds, BoundsContext};
use crate::group::{GroupRange, MaskRange};
use crate::primitives::{flags, GpuCommand, ShapeType};

/// Tile edge in pixels
pub const TILE_SIZE: u32 = 8;

const TILE_SIZE_F: f32 = TILE_SIZE as f32;

/// Padding so shapes ending exactly on a tile edge reach both neighbors
pub const BOUNDARY_PAD: f32 = 1.0;

/// Sample spacing when walking thin strokes
const CURVE_STEP: f32 = TILE_SIZE_F / 2.0;

/// Outcome of one build
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BinReport {
    /// Tile grid exceeded capacity and lost rows
    pub grid_clamped: bool,
    /// Units dropped because the index buffer was full
    pub dropped_units: u32,
    /// Total tile → command assignments
    pub assignments: u32,
}

/// Inclusive tile rectangle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct TileSpan {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl TileSpan {
    fn tiles(&self) -> usize {
        (self.x1 - self.x0 + 1) as usize * (self.y1 - self.y0 + 1) as usize
    }

    fn intersect(self, other: TileSpan) -> Option<TileSpan> {
        let span = TileSpan {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        };
        (span.x0 <= span.x1 && span.y0 <= span.y1).then_some(span)
    }
}

/// A mask whose push marker has been placed
#[derive(Clone, Copy, Debug)]
struct OpenMask {
    pop: u32,
    span: TileSpan,
}

enum MaskOutcome {
    Open,
    /// Mask shape is off the grid, so nothing inside can show
    Hidden,
    Dropped,
}

pub struct TileBinner {
    max_tiles: usize,
    max_indices: usize,
    tiles_x: u32,
    tiles_y: u32,
    // Per-tile assignment counts, reused as write cursors while packing
    counts: Vec<u32>,
    visit: Vec<u32>,
    generation: u32,
    // Tiles with a non-zero count after the last build
    touched: Vec<u32>,
    // (tile, command) in z-order
    assignments: Vec<[u32; 2]>,
    offsets: Vec<u32>,
    indices: Vec<u32>,
    // Ranges sorted by start
    ranges: Vec<GroupRange>,
    // Closed masks sorted by push index
    masks: Vec<MaskRange>,
    // Innermost last
    open_masks: SmallVec<[OpenMask; 8]>,
    // Index capacity held back for the pop markers of open masks
    reserved: usize,
}

impl TileBinner {
    pub fn new(max_tiles: usize, max_indices: usize, max_commands: usize) -> Self {
        Self {
            max_tiles,
            max_indices,
            tiles_x: 0,
            tiles_y: 0,
            counts: vec![0; max_tiles],
            visit: vec![0; max_tiles],
            generation: 0,
            touched: Vec::with_capacity(max_tiles),
            assignments: Vec::with_capacity(max_indices),
            offsets: Vec::with_capacity(max_tiles + 1),
            indices: Vec::with_capacity(max_indices),
            ranges: Vec::with_capacity(max_commands / 2 + 1),
            masks: Vec::with_capacity(max_commands / 2 + 1),
            open_masks: SmallVec::new(),
            reserved: 0,
        }
    }

    /// Assign `commands` to the tiles of a `width × height` target
    pub fn build(
        &mut self,
        width: u32,
        height: u32,
        commands: &[GpuCommand],
        ranges: &[GroupRange],
        masks: &[MaskRange],
        ctx: &BoundsContext<'_>,
    ) -> BinReport {
        let mut report = BinReport::default();

        let mut tiles_x = width.div_ceil(TILE_SIZE);
        let mut tiles_y = height.div_ceil(TILE_SIZE);
        if tiles_x as usize * tiles_y as usize > self.max_tiles {
            report.grid_clamped = true;
            tiles_x = tiles_x.min(self.max_tiles as u32);
            tiles_y = (self.max_tiles / tiles_x as usize) as u32;
        }
        self.tiles_x = tiles_x;
        self.tiles_y = tiles_y;

        for &tile in &self.touched {
            self.counts[tile as usize] = 0;
        }
        self.touched.clear();
        self.assignments.clear();

        self.ranges.clear();
        self.ranges.extend(
            ranges
                .iter()
                .filter(|range| range.start <= range.end && (range.end as usize) < commands.len()),
        );
        self.ranges.sort_unstable_by_key(|range| range.start);

        self.masks.clear();
        self.masks.extend(
            masks
                .iter()
                .filter(|mask| mask.push < mask.pop && (mask.pop as usize) < commands.len()),
        );
        self.masks.sort_unstable_by_key(|mask| mask.push);
        self.open_masks.clear();
        self.reserved = 0;

        let screen = Rect::new(0.0, 0.0, width as f32, height as f32);
        let mut next_range = 0;
        let mut index = 0u32;
        while (index as usize) < commands.len() {
            while next_range < self.ranges.len() && self.ranges[next_range].start < index {
                next_range += 1;
            }
            if let Some(range) = self.ranges.get(next_range).filter(|r| r.start == index).copied() {
                if !self.bin_range(&range, screen) {
                    report.dropped_units += 1;
                }
                index = range.end + 1;
                continue;
            }
            if self.open_masks.last().is_some_and(|mask| mask.pop == index) {
                self.close_mask(index);
                index += 1;
                continue;
            }
            if let Some(mask) = self.mask_at(index) {
                match self.open_mask(mask, &commands[index as usize], ctx) {
                    MaskOutcome::Open => index += 1,
                    MaskOutcome::Hidden => index = mask.pop + 1,
                    MaskOutcome::Dropped => {
                        report.dropped_units += 1;
                        index = mask.pop + 1;
                    }
                }
                continue;
            }
            if !self.bin_command(index, &commands[index as usize], ctx, screen) {
                report.dropped_units += 1;
            }
            index += 1;
        }

        self.pack();
        report.assignments = self.indices.len() as u32;
        tracing::trace!(
            tiles_x = self.tiles_x,
            tiles_y = self.tiles_y,
            commands = commands.len(),
            assignments = report.assignments,
            dropped_units = report.dropped_units,
            "tile binning complete"
        );
        report
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Units
    // ─────────────────────────────────────────────────────────────────────────

    fn begin_unit(&mut self) -> usize {
        if self.generation == u32::MAX {
            self.visit.fill(0);
            self.generation = 0;
        }
        self.generation += 1;
        self.assignments.len()
    }

    /// Every command of the range goes to every tile of the range bounds
    fn bin_range(&mut self, range: &GroupRange, screen: Rect) -> bool {
        let rect = match range.bounds {
            Bounds::Finite(rect) => rect.inflate(BOUNDARY_PAD),
            Bounds::Unbounded => range.clip.unwrap_or(screen),
            Bounds::Empty => return true,
        };
        let Some(span) = self.span(rect) else {
            return true;
        };
        let mark = self.begin_unit();
        let n = (range.end - range.start + 1) as usize;
        for ty in span.y0..=span.y1 {
            for tx in span.x0..=span.x1 {
                let tile = ty * self.tiles_x + tx;
                if self.visit[tile as usize] == self.generation {
                    continue;
                }
                if self.assignments.len() + self.reserved + n > self.max_indices {
                    self.assignments.truncate(mark);
                    return false;
                }
                self.visit[tile as usize] = self.generation;
                self.assignments
                    .extend((range.start..=range.end).map(|command| [tile, command]));
            }
        }
        true
    }

    fn bin_command(&mut self, index: u32, cmd: &GpuCommand, ctx: &BoundsContext<'_>, screen: Rect) -> bool {
        let Some(shape) = cmd.shape_type() else {
            return true;
        };
        if shape.is_marker() || cmd.has_flag(flags::INTERNAL) {
            return true;
        }
        let fallback = cmd.clip_rect().unwrap_or(screen);
        let warp_head = cmd.warp_head();

        let mark = self.begin_unit();
        let ok = if ctx.warps.contains_repeat(warp_head) {
            self.mark_rect(fallback, index)
        } else {
            match shape {
                ShapeType::Line => {
                    let [x0, y0, x1, y1] = cmd.geometry;
                    let radius = cmd.radii[0] + ctx.inflation(cmd, warp_head) + BOUNDARY_PAD;
                    self.mark_segment(Point::new(x0, y0), Point::new(x1, y1), radius, index, screen)
                }
                ShapeType::Polyline => {
                    let points = ctx
                        .polylines
                        .header(cmd.data[0])
                        .and_then(|header| ctx.polylines.points_of(header));
                    match points {
                        Some(points) => {
                            let radius = cmd.radii[0] + ctx.inflation(cmd, warp_head) + BOUNDARY_PAD;
                            self.mark_polyline(points, radius, index, screen)
                        }
                        None => self.mark_rect(fallback, index),
                    }
                }
                _ => match ctx.expanded(cmd) {
                    Bounds::Finite(rect) => self.mark_rect(rect.inflate(BOUNDARY_PAD), index),
                    Bounds::Unbounded => self.mark_rect(fallback, index),
                    Bounds::Empty => true,
                },
            }
        };
        if !ok {
            self.assignments.truncate(mark);
        }
        ok
    }

    fn mask_at(&self, index: u32) -> Option<MaskRange> {
        self.masks
            .binary_search_by_key(&index, |mask| mask.push)
            .ok()
            .map(|i| self.masks[i])
    }

    /// Place the push marker over the mask shape and reserve its pop
    fn open_mask(&mut self, mask: MaskRange, push: &GpuCommand, ctx: &BoundsContext<'_>) -> MaskOutcome {
        let [cx, cy, hw, hh] = push.geometry;
        let rect = Rect::from_center(Point::new(cx, cy), hw.abs(), hh.abs())
            .inflate(ctx.modifiers.expansion(push.modifier_head()) + BOUNDARY_PAD);
        let Some(span) = self.span(rect) else {
            return MaskOutcome::Hidden;
        };
        let tiles = span.tiles();
        if self.assignments.len() + self.reserved + 2 * tiles > self.max_indices {
            return MaskOutcome::Dropped;
        }
        self.begin_unit();
        let placed = self.mark_span(span, mask.push);
        debug_assert!(placed);
        self.reserved += tiles;
        self.open_masks.push(OpenMask { pop: mask.pop, span });
        MaskOutcome::Open
    }

    fn close_mask(&mut self, pop: u32) {
        let Some(mask) = self.open_masks.pop() else {
            return;
        };
        self.reserved -= mask.span.tiles();
        self.begin_unit();
        let placed = self.mark_span(mask.span, pop);
        debug_assert!(placed);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Marking
    // ─────────────────────────────────────────────────────────────────────────

    fn span(&self, rect: Rect) -> Option<TileSpan> {
        if self.tiles_x == 0 || self.tiles_y == 0 || !rect.is_finite() {
            return None;
        }
        let x0 = (rect.x / TILE_SIZE_F).floor();
        let y0 = (rect.y / TILE_SIZE_F).floor();
        let x1 = (rect.right() / TILE_SIZE_F).floor();
        let y1 = (rect.bottom() / TILE_SIZE_F).floor();
        if x1 < 0.0 || y1 < 0.0 || x0 >= self.tiles_x as f32 || y0 >= self.tiles_y as f32 {
            return None;
        }
        let span = TileSpan {
            x0: x0.max(0.0) as u32,
            y0: y0.max(0.0) as u32,
            x1: x1.min((self.tiles_x - 1) as f32) as u32,
            y1: y1.min((self.tiles_y - 1) as f32) as u32,
        };
        self.clamp_to_mask(span)
    }

    /// Tiles outside the innermost open mask never see its children
    fn clamp_to_mask(&self, span: TileSpan) -> Option<TileSpan> {
        match self.open_masks.last() {
            Some(mask) => span.intersect(mask.span),
            None => Some(span),
        }
    }

    fn mark_tile(&mut self, tile: u32, command: u32) -> bool {
        if self.visit[tile as usize] == self.generation {
            return true;
        }
        if self.assignments.len() + self.reserved >= self.max_indices {
            return false;
        }
        self.visit[tile as usize] = self.generation;
        self.assignments.push([tile, command]);
        true
    }

    fn mark_span(&mut self, span: TileSpan, command: u32) -> bool {
        for ty in span.y0..=span.y1 {
            for tx in span.x0..=span.x1 {
                if !self.mark_tile(ty * self.tiles_x + tx, command) {
                    return false;
                }
            }
        }
        true
    }

    fn mark_rect(&mut self, rect: Rect, command: u32) -> bool {
        match self.span(rect) {
            Some(span) => self.mark_span(span, command),
            None => true,
        }
    }

    /// Per-segment stroke coverage
    fn mark_polyline(&mut self, points: &[[f32; 2]], radius: f32, command: u32, screen: Rect) -> bool {
        if let [[x, y]] = points {
            return self.mark_rect(Rect::from_center(Point::new(*x, *y), radius, radius), command);
        }
        points.windows(2).all(|pair| {
            let a = Point::new(pair[0][0], pair[0][1]);
            let b = Point::new(pair[1][0], pair[1][1]);
            self.mark_segment(a, b, radius, command, screen)
        })
    }

    /// Strokes up to a tile wide are walked so diagonals skip most of their
    /// box. Wider strokes cover most of the box anyway and mark it directly.
    fn mark_segment(&mut self, from: Point, to: Point, radius: f32, command: u32, screen: Rect) -> bool {
        if !radius.is_finite() {
            return self.mark_rect(screen, command);
        }
        let Some((from, to)) = clip_segment(from, to, &screen.inflate(radius)) else {
            return true;
        };
        if radius > TILE_SIZE_F {
            return self.mark_rect(Rect::from_points(from, to).inflate(radius), command);
        }
        self.walk_segment(from, to, radius, command)
    }

    /// Sample the segment every half tile and mark every tile within reach
    /// of each sample
    fn walk_segment(&mut self, from: Point, to: Point, radius: f32, command: u32) -> bool {
        if self.tiles_x == 0 || self.tiles_y == 0 {
            return true;
        }
        let grid = TileSpan {
            x0: 0,
            y0: 0,
            x1: self.tiles_x - 1,
            y1: self.tiles_y - 1,
        };
        let Some(limit) = self.clamp_to_mask(grid) else {
            return true;
        };
        let reach = ((radius + CURVE_STEP / 2.0) / TILE_SIZE_F).ceil() as i64;
        let steps = (from.distance(to) / CURVE_STEP).ceil().max(1.0) as u32;
        for i in 0..=steps {
            let p = from.lerp(to, i as f32 / steps as f32);
            let tx = (p.x / TILE_SIZE_F).floor() as i64;
            let ty = (p.y / TILE_SIZE_F).floor() as i64;
            let x0 = (tx - reach).max(limit.x0 as i64);
            let x1 = (tx + reach).min(limit.x1 as i64);
            let y0 = (ty - reach).max(limit.y0 as i64);
            let y1 = (ty + reach).min(limit.y1 as i64);
            if x0 > x1 || y0 > y1 {
                continue;
            }
            let span = TileSpan {
                x0: x0 as u32,
                y0: y0 as u32,
                x1: x1 as u32,
                y1: y1 as u32,
            };
            if !self.mark_span(span, command) {
                return false;
            }
        }
        true
    }

    /// Stable counting sort of the assignments into offsets and indices
    fn pack(&mut self) {
        for &[tile, _] in &self.assignments {
            let count = &mut self.counts[tile as usize];
            if *count == 0 {
                self.touched.push(tile);
            }
            *count += 1;
        }

        let tile_count = self.tile_count();
        self.offsets.clear();
        let mut total = 0u32;
        for tile in 0..tile_count {
            self.offsets.push(total);
            total += self.counts[tile];
        }
        self.offsets.push(total);

        for &tile in &self.touched {
            self.counts[tile as usize] = self.offsets[tile as usize];
        }
        self.indices.clear();
        self.indices.resize(total as usize, 0);
        for &[tile, command] in &self.assignments {
            let cursor = &mut self.counts[tile as usize];
            self.indices[*cursor as usize] = command;
            *cursor += 1;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Results
    // ─────────────────────────────────────────────────────────────────────────

    pub fn tiles_x(&self) -> u32 {
        self.tiles_x
    }

    pub fn tiles_y(&self) -> u32 {
        self.tiles_y
    }

    pub fn tile_count(&self) -> usize {
        self.tiles_x as usize * self.tiles_y as usize
    }

    pub fn tile_offsets(&self) -> &[u32] {
        &self.offsets
    }

    pub fn tile_indices(&self) -> &[u32] {
        &self.indices
    }

    /// Commands assigned to tile `(tx, ty)` in submission order
    pub fn tile_commands(&self, tx: u32, ty: u32) -> &[u32] {
        if tx >= self.tiles_x || ty >= self.tiles_y {
            return &[];
        }
        let tile = (ty * self.tiles_x + tx) as usize;
        match (self.offsets.get(tile), self.offsets.get(tile + 1)) {
            (Some(&start), Some(&end)) => &self.indices[start as usize..end as usize],
            _ => &[],
        }
    }

    /// Tile coordinates containing a pixel
    pub fn tile_at(&self, x: f32, y: f32) -> Option<(u32, u32)> {
        if x < 0.0 || y < 0.0 {
            return None;
        }
        let tx = (x / TILE_SIZE_F) as u32;
        let ty = (y / TILE_SIZE_F) as u32;
        (tx < self.tiles_x && ty < self.tiles_y).then_some((tx, ty))
    }
}

/// Liang–Barsky clip of a segment against a rect
fn clip_segment(from: Point, to: Point, rect: &Rect) -> Option<(Point, Point)> {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    let mut t0 = 0.0f32;
    let mut t1 = 1.0f32;
    for (p, q) in [
        (-dx, from.x - rect.x),
        (dx, rect.right() - from.x),
        (-dy, from.y - rect.y),
        (dy, rect.bottom() - from.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
        if t0 > t1 {
            return None;
        }
    }
    Some((from.lerp(to, t0), from.lerp(to, t1)))
}
