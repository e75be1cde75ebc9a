//! S2: stitching segments into closed outlines.
//!
//! Segments arrive unordered. Stitching repeatedly grows an output polygon
//! by exact endpoint matches where possible and nearest-within-tolerance
//! matches otherwise, flipping segments as needed. Matching is "exact" at
//! lattice resolution: endpoints are hashed by their rounded lattice key, so
//! floating-point noise from interpolating a shared mesh edge from either
//! of its triangles cannot break a match.
//!
//! The unvisited set is an arena-backed doubly-linked list: O(1) removal,
//! no pointers.

use std::collections::HashMap;

use geo::LineString;
use log::warn;
use strata_geom::line::square_distance;
use strata_geom::scalar::lattice_key;
use strata_geom::Point;

use crate::segment::Segment;

const NIL: usize = usize::MAX;

struct Node {
    seg: Segment,
    prev: usize,
    next: usize,
    used: bool,
}

struct Arena {
    nodes: Vec<Node>,
    head: usize,
    remaining: usize,
}

impl Arena {
    fn new(segments: Vec<Segment>) -> Arena {
        let n = segments.len();
        let nodes = segments
            .into_iter()
            .enumerate()
            .map(|(i, seg)| Node {
                seg,
                prev: if i == 0 { NIL } else { i - 1 },
                next: if i + 1 == n { NIL } else { i + 1 },
                used: false,
            })
            .collect();
        Arena {
            nodes,
            head: if n == 0 { NIL } else { 0 },
            remaining: n,
        }
    }

    fn take(&mut self, idx: usize) -> Segment {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        if prev != NIL {
            self.nodes[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].prev = prev;
        }
        self.nodes[idx].used = true;
        self.remaining -= 1;
        self.nodes[idx].seg
    }

    fn iter_free(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(
            if self.head == NIL { None } else { Some(self.head) },
            move |&i| {
                let next = self.nodes[i].next;
                if next == NIL {
                    None
                } else {
                    Some(next)
                }
            },
        )
    }
}

/// Per-slice stitching statistics, reported by the pipeline.
#[derive(Clone, Copy, Debug, Default)]
pub struct StitchStats {
    pub polygons: usize,
    pub flipped_segments: usize,
    pub holes: usize,
}

/// Stitch one slice's segments into closed rings.
///
/// `tolerance` is the maximum gap (in millimeters) bridged by an inexact
/// match; `scale` is the lattice scale used for exact matching;
/// `coarseness` is the Ramer-Douglas-Peucker epsilon applied to each
/// completed ring. `slice` only labels warnings.
pub fn stitch_segments(
    segments: Vec<Segment>,
    tolerance: f64,
    scale: f64,
    coarseness: f64,
    slice: usize,
) -> (Vec<LineString<f64>>, StitchStats) {
    let tol2 = tolerance * tolerance;
    let mut stats = StitchStats::default();

    // Both endpoints of every segment, hashed at lattice resolution.
    let mut by_endpoint: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (i, seg) in segments.iter().enumerate() {
        by_endpoint.entry(lattice_key(seg.a, scale)).or_default().push(i);
        by_endpoint.entry(lattice_key(seg.b, scale)).or_default().push(i);
    }

    let mut arena = Arena::new(segments);
    let mut rings = Vec::new();

    while arena.head != NIL {
        let first = arena.take(arena.head);
        let mut out: Vec<Point> = vec![first.a, first.b];
        let mut flips = 0usize;
        let mut moved = 1usize;

        let closed = loop {
            let end = *out.last().expect("output polygon is never empty");
            let start_key = lattice_key(out[0], scale);
            let end_key = lattice_key(end, scale);

            if out.len() > 2 && start_key == end_key {
                out.pop();
                break true;
            }

            // Exact continuation at lattice resolution.
            let exact = by_endpoint.get(&end_key).and_then(|bucket| {
                bucket.iter().copied().find_map(|i| {
                    if arena.nodes[i].used {
                        return None;
                    }
                    let s = arena.nodes[i].seg;
                    if lattice_key(s.a, scale) == end_key {
                        Some((i, false))
                    } else if lattice_key(s.b, scale) == end_key {
                        Some((i, true))
                    } else {
                        None
                    }
                })
            });

            if let Some((idx, flip)) = exact {
                let s = arena.take(idx);
                let far = if flip { s.a } else { s.b };
                if flip {
                    flips += 1;
                }
                moved += 1;
                if lattice_key(far, scale) != end_key {
                    out.push(far);
                }
                continue;
            }

            // Nearest inexact continuation.
            let mut best: Option<(usize, bool, f64)> = None;
            for i in arena.iter_free() {
                let s = arena.nodes[i].seg;
                let da = square_distance(s.a, end);
                let db = square_distance(s.b, end);
                let (flip, d) = if da <= db { (false, da) } else { (true, db) };
                if best.map_or(true, |(_, _, bd)| d < bd) {
                    best = Some((i, flip, d));
                }
            }

            let close_d = square_distance(out[0], end);
            let can_close = out.len() > 2 && close_d <= tol2;

            match best {
                Some((_, _, bd)) if can_close && close_d < bd => break true,
                Some((idx, flip, bd)) if bd <= tol2 => {
                    let s = arena.take(idx);
                    let far = if flip { s.a } else { s.b };
                    if flip {
                        flips += 1;
                    }
                    moved += 1;
                    out.push(far);
                }
                _ if can_close => break true,
                _ => break false,
            }
        };

        if !closed {
            stats.holes += 1;
            warn!(
                "slice {}: hole in mesh, discarding open outline of {} points",
                slice,
                out.len()
            );
            continue;
        }

        // The initial segment's own orientation was arbitrary: if stitching
        // had to flip most segments, it was wrong.
        if flips * 2 > moved {
            out.reverse();
        }
        stats.flipped_segments += flips;

        if out.len() < 3 {
            continue;
        }
        out.push(out[0]);
        let ring = LineString::new(out);
        let ring = geo::Simplify::simplify(&ring, &coarseness);
        if ring.0.len() >= 4 {
            stats.polygons += 1;
            rings.push(ring);
        }
    }

    (rings, stats)
}
