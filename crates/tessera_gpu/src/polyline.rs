//! Polyline point arena
//!
//! Polylines, polygons and flattened curves share one point buffer and one
//! arc-length buffer. A header describes each run: its point range, bounding
//! box and total length. `lengths[start]` is 0 and lengths never decrease
//! along a run, so the shader can trim and dash at constant speed.

use lyon::geom::{CubicBezierSegment, QuadraticBezierSegment};
use lyon::math::point;
use tessera_paint::Point;

use crate::primitives::GpuPolylineHeader;

/// Target chord length when flattening curves
pub const CURVE_SEGMENT_LENGTH: f32 = 3.0;

/// Upper bound on segments for a single curve. Curves longer than
/// `MAX_CURVE_SEGMENTS * CURVE_SEGMENT_LENGTH` (about 12k px) get longer segments.
pub const MAX_CURVE_SEGMENTS: u32 = 4096;

const CURVE_LENGTH_TOLERANCE: f32 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolylineError {
    /// Point buffer exhausted
    PointsFull,
    /// Header buffer exhausted
    HeadersFull,
    /// Range is empty or outside the allocated points
    InvalidRange,
}

pub struct PolylineStore {
    points: Vec<[f32; 2]>,
    lengths: Vec<f32>,
    headers: Vec<GpuPolylineHeader>,
    max_points: usize,
    max_polylines: usize,
}

impl PolylineStore {
    pub fn new(max_points: usize, max_polylines: usize) -> Self {
        Self {
            points: Vec::with_capacity(max_points),
            lengths: Vec::with_capacity(max_points),
            headers: Vec::with_capacity(max_polylines),
            max_points,
            max_polylines,
        }
    }

    /// Reserve `n` zeroed points, returning the start offset
    pub fn allocate_points(&mut self, n: usize) -> Option<u32> {
        if self.points.len() + n > self.max_points {
            return None;
        }
        let start = self.points.len();
        self.points.resize(start + n, [0.0; 2]);
        self.lengths.resize(start + n, 0.0);
        Some(start as u32)
    }

    /// Overwrite an allocated point. Returns false if `index` was never allocated.
    pub fn set_point(&mut self, index: u32, p: Point) -> bool {
        match self.points.get_mut(index as usize) {
            Some(slot) => {
                *slot = p.to_array();
                true
            }
            None => false,
        }
    }

    /// Seal `points[start..start + count]` into a polyline: bounds, arc-length
    /// prefix sums and total length. Returns the header index.
    pub fn add_polyline_header(&mut self, start: u32, count: u32) -> Result<u32, PolylineError> {
        let begin = start as usize;
        let end = begin + count as usize;
        if count == 0 || end > self.points.len() {
            return Err(PolylineError::InvalidRange);
        }
        if self.headers.len() >= self.max_polylines {
            return Err(PolylineError::HeadersFull);
        }

        let mut min = self.points[begin];
        let mut max = min;
        let mut total = 0.0f32;
        self.lengths[begin] = 0.0;
        for i in begin + 1..end {
            let [px, py] = self.points[i - 1];
            let [x, y] = self.points[i];
            total += ((x - px) * (x - px) + (y - py) * (y - py)).sqrt();
            self.lengths[i] = total;
            min = [min[0].min(x), min[1].min(y)];
            max = [max[0].max(x), max[1].max(y)];
        }

        let index = self.headers.len() as u32;
        self.headers.push(GpuPolylineHeader {
            start,
            count,
            total_length: total,
            _pad: 0.0,
            bounds_min: min,
            bounds_max: max,
        });
        Ok(index)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Incremental building
    // ─────────────────────────────────────────────────────────────────────────

    /// Offset the next appended point will land at
    pub fn cursor(&self) -> u32 {
        self.points.len() as u32
    }

    pub fn push_point(&mut self, p: Point) -> Result<(), PolylineError> {
        if self.points.len() >= self.max_points {
            return Err(PolylineError::PointsFull);
        }
        self.points.push(p.to_array());
        self.lengths.push(0.0);
        Ok(())
    }

    /// Append a flattened cubic, excluding `from` (already the last point).
    /// All or nothing.
    pub fn push_cubic(&mut self, from: Point, ctrl1: Point, ctrl2: Point, to: Point) -> Result<(), PolylineError> {
        let curve = CubicBezierSegment {
            from: point(from.x, from.y),
            ctrl1: point(ctrl1.x, ctrl1.y),
            ctrl2: point(ctrl2.x, ctrl2.y),
            to: point(to.x, to.y),
        };
        let segments = curve_segments(curve.approximate_length(CURVE_LENGTH_TOLERANCE));
        if self.points.len() + segments as usize > self.max_points {
            return Err(PolylineError::PointsFull);
        }
        for i in 1..=segments {
            let p = curve.sample(i as f32 / segments as f32);
            self.points.push([p.x, p.y]);
            self.lengths.push(0.0);
        }
        Ok(())
    }

    /// Append a flattened quadratic, excluding `from`
    pub fn push_quad(&mut self, from: Point, ctrl: Point, to: Point) -> Result<(), PolylineError> {
        let cubic = QuadraticBezierSegment {
            from: point(from.x, from.y),
            ctrl: point(ctrl.x, ctrl.y),
            to: point(to.x, to.y),
        }
        .to_cubic();
        self.push_cubic(
            Point::new(cubic.from.x, cubic.from.y),
            Point::new(cubic.ctrl1.x, cubic.ctrl1.y),
            Point::new(cubic.ctrl2.x, cubic.ctrl2.y),
            Point::new(cubic.to.x, cubic.to.y),
        )
    }

    /// Discard points appended after `cursor`
    pub fn rewind(&mut self, cursor: u32) {
        self.points.truncate(cursor as usize);
        self.lengths.truncate(cursor as usize);
    }

    /// Drop the most recent run: its points from `cursor` and its header
    pub fn discard(&mut self, cursor: u32, header: u32) {
        self.rewind(cursor);
        self.headers.truncate(header as usize);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lookup
    // ─────────────────────────────────────────────────────────────────────────

    pub fn header(&self, index: u32) -> Option<&GpuPolylineHeader> {
        self.headers.get(index as usize)
    }

    /// Points of a header, `None` if the header references points outside the buffer
    pub fn points_of(&self, header: &GpuPolylineHeader) -> Option<&[[f32; 2]]> {
        let start = header.start as usize;
        self.points.get(start..start + header.count as usize)
    }

    pub fn points(&self) -> &[[f32; 2]] {
        &self.points
    }

    pub fn lengths(&self) -> &[f32] {
        &self.lengths
    }

    pub fn headers(&self) -> &[GpuPolylineHeader] {
        &self.headers
    }

    pub fn reset(&mut self) {
        self.points.clear();
        self.lengths.clear();
        self.headers.clear();
    }
}

fn curve_segments(length: f32) -> u32 {
    if !length.is_finite() {
        return MAX_CURVE_SEGMENTS;
    }
    ((length / CURVE_SEGMENT_LENGTH).ceil() as u32).clamp(1, MAX_CURVE_SEGMENTS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_bounds_and_lengths() {
        let mut store = PolylineStore::new(16, 4);
        let start = store.allocate_points(4).unwrap();
        for (i, p) in [(0.0, 0.0), (3.0, 4.0), (3.0, 4.0), (3.0, -6.0)].iter().enumerate() {
            assert!(store.set_point(start + i as u32, Point::new(p.0, p.1)));
        }
        let header = store.add_polyline_header(start, 4).unwrap();
        let header = *store.header(header).unwrap();

        assert_eq!(header.total_length, 15.0);
        assert_eq!(header.bounds_min, [0.0, -6.0]);
        assert_eq!(header.bounds_max, [3.0, 4.0]);
        assert_eq!(store.lengths(), &[0.0, 5.0, 5.0, 15.0]);
    }

    #[test]
    fn test_lengths_restart_per_polyline() {
        let mut store = PolylineStore::new(16, 4);
        for _ in 0..2 {
            let start = store.cursor();
            store.push_point(Point::new(10.0, 0.0)).unwrap();
            store.push_point(Point::new(20.0, 0.0)).unwrap();
            store.add_polyline_header(start, 2).unwrap();
        }
        assert_eq!(store.lengths(), &[0.0, 10.0, 0.0, 10.0]);
    }

    #[test]
    fn test_overflow_and_invalid_ranges() {
        let mut store = PolylineStore::new(4, 1);
        assert_eq!(store.allocate_points(5), None);
        let start = store.allocate_points(4).unwrap();
        assert_eq!(store.add_polyline_header(start, 5), Err(PolylineError::InvalidRange));
        assert_eq!(store.add_polyline_header(start, 0), Err(PolylineError::InvalidRange));
        assert!(!store.set_point(4, Point::ZERO));
        assert_eq!(store.add_polyline_header(start, 4), Ok(0));
        assert_eq!(store.add_polyline_header(start, 4), Err(PolylineError::HeadersFull));
    }

    #[test]
    fn test_cubic_flattening_density() {
        let mut store = PolylineStore::new(1024, 4);
        let from = Point::new(0.0, 0.0);
        let to = Point::new(300.0, 0.0);
        store.push_point(from).unwrap();
        store
            .push_cubic(from, Point::new(100.0, 0.0), Point::new(200.0, 0.0), to)
            .unwrap();

        // A straight 300px curve needs ~100 segments at 3px each
        let count = store.points().len() - 1;
        assert!((95..=105).contains(&count), "segments = {count}");
        let last = store.points()[count];
        assert!((last[0] - 300.0).abs() < 1e-3 && last[1].abs() < 1e-3);
    }

    #[test]
    fn test_long_curve_keeps_segment_length() {
        let mut store = PolylineStore::new(8192, 4);
        let from = Point::new(0.0, 0.0);
        let to = Point::new(3000.0, 0.0);
        store.push_point(from).unwrap();
        store
            .push_cubic(from, Point::new(1000.0, 0.0), Point::new(2000.0, 0.0), to)
            .unwrap();

        let longest = store
            .points()
            .windows(2)
            .map(|w| (w[1][0] - w[0][0]).hypot(w[1][1] - w[0][1]))
            .fold(0.0f32, f32::max);
        assert!(longest <= CURVE_SEGMENT_LENGTH + 0.1, "longest segment {longest}");
    }

    #[test]
    fn test_discard_releases_last_run() {
        let mut store = PolylineStore::new(16, 4);
        let start = store.allocate_points(3).unwrap();
        let header = store.add_polyline_header(start, 3).unwrap();
        store.discard(start, header);
        assert!(store.points().is_empty() && store.lengths().is_empty());
        assert!(store.headers().is_empty());
        assert_eq!(store.allocate_points(3), Some(0));
    }

    #[test]
    fn test_cubic_is_all_or_nothing() {
        let mut store = PolylineStore::new(8, 4);
        let cursor = store.cursor();
        store.push_point(Point::ZERO).unwrap();
        let result = store.push_quad(Point::ZERO, Point::new(50.0, 100.0), Point::new(100.0, 0.0));
        assert_eq!(result, Err(PolylineError::PointsFull));
        assert_eq!(store.points().len(), 1);
        store.rewind(cursor);
        assert!(store.points().is_empty());
    }
}
