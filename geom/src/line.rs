//! Line segment math on the slice plane.

use crate::{point, Point};

/// A linear segment.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LineSegment {
    pub from: Point,
    pub to: Point,
}

#[inline]
pub fn seg(from: Point, to: Point) -> LineSegment {
    LineSegment { from, to }
}

impl LineSegment {
    /// Sample the segment at t (expecting t between 0 and 1).
    #[inline]
    pub fn sample(&self, t: f64) -> Point {
        point(
            self.from.x + (self.to.x - self.from.x) * t,
            self.from.y + (self.to.y - self.from.y) * t,
        )
    }

    #[inline]
    pub fn to_vector(&self) -> Point {
        point(self.to.x - self.from.x, self.to.y - self.from.y)
    }

    #[inline]
    pub fn length(&self) -> f64 {
        self.square_length().sqrt()
    }

    #[inline]
    pub fn square_length(&self) -> f64 {
        let v = self.to_vector();
        v.x * v.x + v.y * v.y
    }

    /// Returns an inverted version of this segment where the beginning and
    /// the end points are swapped.
    #[inline]
    pub fn flip(&self) -> Self {
        LineSegment {
            from: self.to,
            to: self.from,
        }
    }

    /// Return the segment before the split point.
    #[inline]
    pub fn before_split(&self, t: f64) -> Self {
        LineSegment {
            from: self.from,
            to: self.sample(t),
        }
    }

    /// Intersection parameter along `self` with another segment, if the two
    /// segments properly cross (endpoints touching counts as a crossing).
    pub fn intersection_t(&self, other: &Self) -> Option<f64> {
        let d1 = self.to_vector();
        let d2 = other.to_vector();
        let denom = d1.x * d2.y - d1.y * d2.x;
        if denom.abs() < 1e-12 {
            return None;
        }
        let dx = other.from.x - self.from.x;
        let dy = other.from.y - self.from.y;
        let t = (dx * d2.y - dy * d2.x) / denom;
        let u = (dx * d1.y - dy * d1.x) / denom;
        if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
            Some(t)
        } else {
            None
        }
    }

    /// Intersection point with another segment, if any.
    pub fn intersection(&self, other: &Self) -> Option<Point> {
        self.intersection_t(other).map(|t| self.sample(t))
    }

    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        self.intersection_t(other).is_some()
    }

    /// The point of this segment closest to `p`.
    pub fn closest_point(&self, p: Point) -> Point {
        let v = self.to_vector();
        let sq = self.square_length();
        if sq <= 0.0 {
            return self.from;
        }
        let t = ((p.x - self.from.x) * v.x + (p.y - self.from.y) * v.y) / sq;
        self.sample(t.clamp(0.0, 1.0))
    }

    /// Squared distance between `p` and this segment.
    #[inline]
    pub fn square_distance_to_point(&self, p: Point) -> f64 {
        square_distance(self.closest_point(p), p)
    }
}

#[inline]
pub fn square_distance(a: Point, b: Point) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

#[inline]
pub fn distance(a: Point, b: Point) -> f64 {
    square_distance(a, b).sqrt()
}

/// Linear interpolation between two points.
#[inline]
pub fn lerp(a: Point, b: Point, t: f64) -> Point {
    point(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t)
}
