//! Combing: routing travel moves around printed boundaries.

use geo::{LineString, MultiPolygon};
use strata_geom::line::{distance, square_distance, LineSegment};
use strata_geom::polygon::{nearest_vertex, ring_edges, ring_len};
use strata_geom::Point;

/// Number of times the open segment `p0 -> p1` crosses the ring.
///
/// Only crossings strictly interior to the travel leg count: a leg that
/// starts or ends exactly on the ring is touching it, not crossing it.
pub fn ring_crossings(p0: Point, p1: Point, ring: &LineString<f64>) -> usize {
    const EPS: f64 = 1e-9;
    let seg = LineSegment { from: p0, to: p1 };
    ring_edges(ring)
        .filter(|e| {
            seg.intersection_t(e)
                .map_or(false, |t| t > EPS && t < 1.0 - EPS)
        })
        .count()
}

/// Whether the travel `p0 -> p1` crosses any ring of the region at all.
pub fn crosses_region(p0: Point, p1: Point, region: &MultiPolygon<f64>) -> bool {
    strata_geom::clip::rings(region).any(|ring| ring_crossings(p0, p1, ring) >= 1)
}

/// Whether `p0 -> p1` passes through a ring (in one side, out the other).
fn blocked_by(p0: Point, p1: Point, ring: &LineString<f64>) -> bool {
    ring_crossings(p0, p1, ring) >= 2
}

/// The point of any comb-path ring closest to `p`, so travel rides printed
/// geometry instead of the offset boundary.
fn snap_to_paths(p: Point, paths: &[&LineString<f64>]) -> Point {
    let mut best = p;
    let mut best_d = f64::MAX;
    for ring in paths {
        for edge in ring_edges(ring) {
            let q = edge.closest_point(p);
            let d = square_distance(q, p);
            if d < best_d {
                best_d = d;
                best = q;
            }
        }
    }
    best
}

/// Result of routing one travel move.
pub struct CombRoute {
    /// Intermediate points to visit between origin and destination.
    pub via: Vec<Point>,
    /// Total travel distance including the final leg.
    pub length: f64,
    /// A boundary could not be routed around and was abandoned.
    pub forced_retract: bool,
}

/// Route `p0 -> p1` around `boundaries`, snapping onto `comb_paths`.
///
/// Repeated shortest-progress loop: find the blocking boundary nearest the
/// destination, walk the shorter way around it taking the furthest point
/// reachable without re-crossing anything, and drop the boundary (forcing a
/// retract) whenever an iteration makes no progress.
pub fn comb_route(
    p0: Point,
    p1: Point,
    boundaries: &MultiPolygon<f64>,
    comb_paths: &MultiPolygon<f64>,
) -> CombRoute {
    let rings: Vec<&LineString<f64>> = strata_geom::clip::rings(boundaries)
        .filter(|r| r.0.len() >= 4)
        .collect();
    let paths: Vec<&LineString<f64>> = strata_geom::clip::rings(comb_paths).collect();

    let mut active: Vec<&LineString<f64>> = rings;
    let mut via: Vec<Point> = Vec::new();
    let mut cur = p0;
    let mut forced_retract = false;

    let mut rounds = active.len() + 1;
    while rounds > 0 {
        rounds -= 1;

        // The blocking boundary nearest to the destination.
        let blocking = active
            .iter()
            .enumerate()
            .filter(|(_, ring)| blocked_by(cur, p1, ring))
            .min_by(|(_, a), (_, b)| {
                let da = nearest_vertex(a, p1).1;
                let db = nearest_vertex(b, p1).1;
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i);
        let Some(ring_idx) = blocking else { break };
        let ring = active[ring_idx];

        let n = ring_len(ring);
        let (i0, _) = nearest_vertex(ring, cur);
        let (i1, _) = nearest_vertex(ring, p1);

        // Shorter way around: forward or backward along the ring.
        let fwd_len: f64 = walk_len(ring, i0, i1, 1);
        let bwd_len: f64 = walk_len(ring, i0, i1, -1);
        let dir: i64 = if fwd_len <= bwd_len { 1 } else { -1 };

        // Index sequence from one point back of the origin-nearest vertex
        // to the destination-nearest vertex.
        let mut seq = Vec::new();
        let steps = if dir == 1 {
            (i1 + n - i0) % n
        } else {
            (i0 + n - i1) % n
        };
        let start = ((i0 as i64 - dir).rem_euclid(n as i64)) as usize;
        for s in 0..=steps + 1 {
            let idx = ((start as i64 + dir * s as i64).rem_euclid(n as i64)) as usize;
            seq.push(ring.0[idx]);
        }

        let before = distance(cur, p1);
        let mut progressed = false;
        let mut pos = 0usize;
        while pos < seq.len() {
            // Furthest point along the walk reachable without passing
            // through any remaining boundary.
            let reachable = (pos..seq.len())
                .rev()
                .map(|i| (i, snap_to_paths(seq[i], &paths)))
                .find(|(_, q)| {
                    !active
                        .iter()
                        .any(|r| ring_crossings(cur, *q, r) >= 1)
                });
            let Some((idx, q)) = reachable else { break };
            if square_distance(q, cur) > 1e-18 {
                via.push(q);
                cur = q;
                progressed = true;
            }
            pos = idx + 1;
            if ring_crossings(cur, p1, ring) == 0 {
                break;
            }
        }

        if !progressed || distance(cur, p1) >= before {
            // Give up on this boundary and punch through it retracted.
            active.remove(ring_idx);
            forced_retract = true;
        }
    }

    let mut length = 0.0;
    let mut prev = p0;
    for &p in &via {
        length += distance(prev, p);
        prev = p;
    }
    length += distance(prev, p1);

    CombRoute {
        via,
        length,
        forced_retract,
    }
}

fn walk_len(ring: &LineString<f64>, from: usize, to: usize, dir: i64) -> f64 {
    let n = ring_len(ring);
    if n == 0 {
        return 0.0;
    }
    let steps = if dir == 1 {
        (to + n - from) % n
    } else {
        (from + n - to) % n
    };
    let mut len = 0.0;
    let mut idx = from;
    for _ in 0..steps {
        let next = ((idx as i64 + dir).rem_euclid(n as i64)) as usize;
        len += distance(ring.0[idx], ring.0[next]);
        idx = next;
    }
    len
}
