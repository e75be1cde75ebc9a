//! Interface to the polygon clipping/offsetting engine.
//!
//! The engine itself is external: `geo-clipper` drives the Clipper engine
//! for boolean operations and polygon offsets, with every operation scaled
//! onto the signed 64-bit integer lattice by the `scale_constant` factor
//! carried in [`ClipCtx`]. Open-path clipping and Ramer-Douglas-Peucker
//! simplification come from `geo`. A fresh engine instance is constructed
//! per operation, so a `ClipCtx` can be shared freely across threads.

use geo::coordinate_position::{CoordPos, CoordinatePosition};
use geo::{BooleanOps, LineString, MultiLineString, MultiPolygon};
use geo_clipper::{Clipper, EndType, JoinType};

use crate::scalar::DEFAULT_SCALE;
use crate::Point;

/// Join style for polygon offsets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Join {
    /// Mitered corners, the default for shells and insets.
    Miter,
    /// Squared-off corners, used for support maps, brim rings and other
    /// regions that must not grow spikes at acute corners.
    Square,
}

const MITER_LIMIT: f64 = 2.0;

/// Clipping-engine context: just the lattice scale, copied everywhere.
#[derive(Copy, Clone, Debug)]
pub struct ClipCtx {
    pub scale: f64,
}

impl Default for ClipCtx {
    fn default() -> Self {
        ClipCtx {
            scale: DEFAULT_SCALE,
        }
    }
}

impl ClipCtx {
    pub fn new(scale: f64) -> Self {
        ClipCtx { scale }
    }

    fn join_type(&self, join: Join) -> JoinType {
        match join {
            Join::Miter => JoinType::Miter(MITER_LIMIT),
            Join::Square => JoinType::Square,
        }
    }

    pub fn union(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        if a.0.is_empty() {
            return b.clone();
        }
        if b.0.is_empty() {
            return a.clone();
        }
        Clipper::union(a, b, self.scale)
    }

    /// Union of an arbitrary collection of regions.
    pub fn union_all(
        &self,
        parts: impl IntoIterator<Item = MultiPolygon<f64>>,
    ) -> MultiPolygon<f64> {
        let mut acc = MultiPolygon::new(vec![]);
        for part in parts {
            acc = self.union(&acc, &part);
        }
        acc
    }

    /// Even-odd fold of a collection of rings: regions covered by an even
    /// number of rings vanish. This is how overlapping stitched contours
    /// are resolved under the even-odd fill rule (`combine_all` and the
    /// even-odd poly-fill mode). Support maps are merged with [`union_all`]
    /// instead: overlapping deposits there must not cancel.
    ///
    /// [`union_all`]: ClipCtx::union_all
    pub fn union_even_odd(
        &self,
        parts: impl IntoIterator<Item = MultiPolygon<f64>>,
    ) -> MultiPolygon<f64> {
        let mut acc = MultiPolygon::new(vec![]);
        for part in parts {
            if acc.0.is_empty() {
                acc = part;
            } else if !part.0.is_empty() {
                acc = Clipper::xor(&acc, &part, self.scale);
            }
        }
        acc
    }

    /// One engine pass over a single region: merges self-overlap and
    /// regroups rings into properly nested polygons.
    pub fn normalize(&self, mp: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        if mp.0.is_empty() {
            return MultiPolygon::new(vec![]);
        }
        Clipper::union(mp, &MultiPolygon::<f64>::new(vec![]), self.scale)
    }

    pub fn difference(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        if a.0.is_empty() || b.0.is_empty() {
            return a.clone();
        }
        Clipper::difference(a, b, self.scale)
    }

    pub fn intersection(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        if a.0.is_empty() || b.0.is_empty() {
            return MultiPolygon::new(vec![]);
        }
        Clipper::intersection(a, b, self.scale)
    }

    /// Offset a region by `delta` millimeters (positive grows, negative
    /// shrinks). Holes are carried through each polygon's ring set.
    pub fn offset(&self, mp: &MultiPolygon<f64>, delta: f64, join: Join) -> MultiPolygon<f64> {
        if mp.0.is_empty() {
            return MultiPolygon::new(vec![]);
        }
        let jt = self.join_type(join);
        let mut polys = Vec::new();
        for poly in &mp.0 {
            polys.extend(
                poly.offset(delta, jt, EndType::ClosedPolygon, self.scale)
                    .0,
            );
        }
        let out = MultiPolygon::new(polys);
        // Outward offsets of separate polygons can run into each other.
        if delta > 0.0 && mp.0.len() > 1 {
            self.normalize(&out)
        } else {
            out
        }
    }

    /// Offset with overlap removal: overshoot by `removal` in the direction
    /// of the offset, then come back. Inward, this erases slivers narrower
    /// than `2 * removal`; outward, it seals gaps of the same width.
    pub fn offset_removing(
        &self,
        mp: &MultiPolygon<f64>,
        delta: f64,
        removal: f64,
        join: Join,
    ) -> MultiPolygon<f64> {
        if removal <= 0.0 {
            return self.offset(mp, delta, join);
        }
        let dir = if delta < 0.0 { -1.0 } else { 1.0 };
        let first = self.offset(mp, delta + dir * removal, join);
        self.offset(&first, -dir * removal, join)
    }

    /// Ramer-Douglas-Peucker simplification of every ring.
    pub fn simplify(&self, mp: &MultiPolygon<f64>, epsilon: f64) -> MultiPolygon<f64> {
        geo::Simplify::simplify(mp, &epsilon)
    }

    pub fn simplify_ring(&self, ring: &LineString<f64>, epsilon: f64) -> LineString<f64> {
        geo::Simplify::simplify(ring, &epsilon)
    }

    /// Clip open paths against a region, keeping the inside parts.
    pub fn clip_lines(
        &self,
        region: &MultiPolygon<f64>,
        lines: &MultiLineString<f64>,
    ) -> MultiLineString<f64> {
        if region.0.is_empty() || lines.0.is_empty() {
            return MultiLineString::new(vec![]);
        }
        region.clip(lines, false)
    }

    /// Point-in-region test; points on the boundary count as inside.
    pub fn contains(&self, region: &MultiPolygon<f64>, p: Point) -> bool {
        region.coordinate_position(&p) != CoordPos::Outside
    }
}

/// Every ring of a region: exteriors first, then holes, per polygon.
pub fn rings(mp: &MultiPolygon<f64>) -> impl Iterator<Item = &LineString<f64>> {
    mp.0.iter()
        .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors().iter()))
}

/// Total area of a region in square millimeters.
pub fn area(mp: &MultiPolygon<f64>) -> f64 {
    use geo::Area;
    mp.unsigned_area()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, polygon, Line};

    fn square(x0: f64, y0: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
        ]])
    }

    #[test]
    fn union_of_overlapping_squares() {
        let ctx = ClipCtx::new(1e4);
        let u = ctx.union(&square(0.0, 0.0, 2.0), &square(1.0, 0.0, 2.0));
        assert_eq!(u.0.len(), 1);
        assert!((area(&u) - 6.0).abs() < 1e-3);
    }

    #[test]
    fn difference_cuts_a_hole() {
        let ctx = ClipCtx::new(1e4);
        let d = ctx.difference(&square(0.0, 0.0, 4.0), &square(1.0, 1.0, 2.0));
        assert_eq!(d.0.len(), 1);
        assert_eq!(d.0[0].interiors().len(), 1);
        assert!((area(&d) - 12.0).abs() < 1e-3);
    }

    #[test]
    fn inward_offset_shrinks_each_side() {
        let ctx = ClipCtx::new(1e4);
        let o = ctx.offset(&square(0.0, 0.0, 10.0), -1.0, Join::Miter);
        assert!((area(&o) - 64.0).abs() < 1e-2);
    }

    #[test]
    fn offset_removing_erases_thin_necks() {
        let ctx = ClipCtx::new(1e4);
        // Two 4x4 blocks joined by a 0.2-wide neck.
        let blocks = ctx.union(
            &ctx.union(&square(0.0, 0.0, 4.0), &square(6.0, 0.0, 4.0)),
            &MultiPolygon::new(vec![polygon![
                (x: 4.0, y: 1.9),
                (x: 6.0, y: 1.9),
                (x: 6.0, y: 2.1),
                (x: 4.0, y: 2.1),
            ]]),
        );
        let cleaned = ctx.offset_removing(&blocks, -0.5, 0.5, Join::Miter);
        // The neck is gone, leaving two disjoint islands.
        assert_eq!(cleaned.0.len(), 2);
    }

    #[test]
    fn even_odd_fold_cancels_double_cover() {
        let ctx = ClipCtx::new(1e4);
        let folded = ctx.union_even_odd(vec![square(0.0, 0.0, 4.0), square(1.0, 1.0, 2.0)]);
        assert!((area(&folded) - 12.0).abs() < 1e-3);
    }

    #[test]
    fn clip_lines_keeps_inside_spans() {
        let ctx = ClipCtx::default();
        let region = square(0.0, 0.0, 10.0);
        let lines = MultiLineString::new(vec![line_string![
            (x: -5.0, y: 5.0),
            (x: 15.0, y: 5.0),
        ]]);
        let clipped = ctx.clip_lines(&region, &lines);
        let total: f64 = clipped
            .0
            .iter()
            .flat_map(|ls| ls.lines())
            .map(|l: Line<f64>| (l.end.x - l.start.x).hypot(l.end.y - l.start.y))
            .sum();
        assert!((total - 10.0).abs() < 1e-6);
    }

    #[test]
    fn contains_includes_boundary() {
        let ctx = ClipCtx::default();
        let region = square(0.0, 0.0, 2.0);
        assert!(ctx.contains(&region, crate::point(1.0, 1.0)));
        assert!(ctx.contains(&region, crate::point(0.0, 1.0)));
        assert!(!ctx.contains(&region, crate::point(3.0, 1.0)));
    }
}
