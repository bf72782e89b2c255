//! Geometric primitives

use crate::path::Point;

/// An axis-aligned rectangle (origin plus size, y grows downward)
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const ZERO: Rect = Rect::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from min/max corners. Inverted corners produce an empty rect.
    pub fn from_min_max(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self {
            x: min_x,
            y: min_y,
            width: (max_x - min_x).max(0.0),
            height: (max_y - min_y).max(0.0),
        }
    }

    pub fn from_points(p1: Point, p2: Point) -> Self {
        Self::from_min_max(p1.x.min(p2.x), p1.y.min(p2.y), p1.x.max(p2.x), p1.y.max(p2.y))
    }

    /// Rect centered on `center` with the given half extents
    pub fn from_center(center: Point, half_width: f32, half_height: f32) -> Self {
        Self::new(
            center.x - half_width,
            center.y - half_height,
            half_width * 2.0,
            half_height * 2.0,
        )
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x
            && point.x <= self.right()
            && point.y >= self.y
            && point.y <= self.bottom()
    }

    /// Smallest rect containing both
    pub fn union(&self, other: &Rect) -> Rect {
        Rect::from_min_max(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    /// Overlapping region. Disjoint rects give a zero-sized rect at the
    /// clamped corner.
    pub fn intersection(&self, other: &Rect) -> Rect {
        let min_x = self.x.max(other.x);
        let min_y = self.y.max(other.y);
        Rect::from_min_max(
            min_x,
            min_y,
            self.right().min(other.right()).max(min_x),
            self.bottom().min(other.bottom()).max(min_y),
        )
    }

    /// True unless the rects are strictly separated; shared edges count as
    /// overlapping.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x <= other.right()
            && other.x <= self.right()
            && self.y <= other.bottom()
            && other.y <= self.bottom()
    }

    /// Grow every side by `amount`
    pub fn inflate(&self, amount: f32) -> Rect {
        Rect::new(
            self.x - amount,
            self.y - amount,
            self.width + amount * 2.0,
            self.height + amount * 2.0,
        )
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }

    /// (x, y, width, height) as a `vec4<f32>`
    pub fn to_array(&self) -> [f32; 4] {
        [self.x, self.y, self.width, self.height]
    }
}

/// Corner radius for rounded rectangles
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[repr(C)]
pub struct CornerRadius {
    pub top_left: f32,
    pub top_right: f32,
    pub bottom_right: f32,
    pub bottom_left: f32,
}

impl CornerRadius {
    pub const ZERO: CornerRadius = CornerRadius::uniform(0.0);

    pub const fn uniform(radius: f32) -> Self {
        Self {
            top_left: radius,
            top_right: radius,
            bottom_right: radius,
            bottom_left: radius,
        }
    }

    pub const fn new(top_left: f32, top_right: f32, bottom_right: f32, bottom_left: f32) -> Self {
        Self {
            top_left,
            top_right,
            bottom_right,
            bottom_left,
        }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_right,
            self.bottom_left,
        ]
    }
}

impl From<f32> for CornerRadius {
    fn from(radius: f32) -> Self {
        Self::uniform(radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_and_intersection() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 10.0, 10.0);

        assert_eq!(a.union(&b), Rect::new(0.0, 0.0, 15.0, 15.0));
        assert_eq!(a.intersection(&b), Rect::new(5.0, 5.0, 5.0, 5.0));

        let far = Rect::new(100.0, 100.0, 1.0, 1.0);
        assert!(!a.intersects(&far));
        assert_eq!(a.intersection(&far).width, 0.0);
    }

    #[test]
    fn test_touching_edges_intersect() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(10.0, 0.0, 10.0, 10.0);
        assert!(a.intersects(&b));
    }

    #[test]
    fn test_inflate_and_center() {
        let r = Rect::from_center(Point::new(50.0, 50.0), 10.0, 5.0).inflate(2.0);
        assert_eq!(r, Rect::new(38.0, 43.0, 24.0, 14.0));
        assert_eq!(r.center(), Point::new(50.0, 50.0));
        assert!(r.contains(Point::new(38.0, 43.0)));
    }
}
