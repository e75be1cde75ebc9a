//! Axis-aligned bounding boxes on the integer lattice.
//!
//! Boxes are stored y-up: `y0 <= y1` always holds, and the overlap test is
//! the standard separating-axis form on both axes.

use crate::scalar::to_lattice;
use geo::{LineString, MultiPolygon};

/// An axis-aligned rectangle in lattice units.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Aabb {
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl Aabb {
    /// An empty box that any point extends.
    pub const EMPTY: Aabb = Aabb {
        x0: i64::MAX,
        y0: i64::MAX,
        x1: i64::MIN,
        y1: i64::MIN,
    };

    pub fn is_empty(&self) -> bool {
        self.x0 > self.x1 || self.y0 > self.y1
    }

    pub fn add_point(&mut self, x: i64, y: i64) {
        self.x0 = self.x0.min(x);
        self.y0 = self.y0.min(y);
        self.x1 = self.x1.max(x);
        self.y1 = self.y1.max(y);
    }

    /// Covering box of every point of every ring.
    pub fn from_rings<'l>(rings: impl Iterator<Item = &'l LineString<f64>>, scale: f64) -> Aabb {
        let mut b = Aabb::EMPTY;
        for ring in rings {
            for c in &ring.0 {
                b.add_point(to_lattice(c.x, scale), to_lattice(c.y, scale));
            }
        }
        b
    }

    pub fn from_polygons(mp: &MultiPolygon<f64>, scale: f64) -> Aabb {
        Aabb::from_rings(
            mp.0.iter()
                .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors().iter())),
            scale,
        )
    }

    /// Whether two boxes overlap (touching edges count as overlap).
    pub fn intersects(&self, other: &Aabb) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x0 <= other.x1
            && other.x0 <= self.x1
            && self.y0 <= other.y1
            && other.y0 <= self.y1
    }

    /// Grow the box by `margin` lattice units on every side.
    pub fn inflate(&self, margin: i64) -> Aabb {
        Aabb {
            x0: self.x0 - margin,
            y0: self.y0 - margin,
            x1: self.x1 + margin,
            y1: self.y1 + margin,
        }
    }

    /// Box corners in real millimeters: (min_x, min_y, max_x, max_y).
    pub fn to_mm(&self, scale: f64) -> (f64, f64, f64, f64) {
        (
            self.x0 as f64 / scale,
            self.y0 as f64 / scale,
            self.x1 as f64 / scale,
            self.y1 as f64 / scale,
        )
    }
}
