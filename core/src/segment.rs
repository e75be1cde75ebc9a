//! S1: plane-triangle intersection.
//!
//! Every triangle is cut by every mid-layer plane `z_i = (i + 0.5) *
//! layer_height` crossing it, producing one oriented 2D segment per plane.
//! Triangles are processed in parallel; each slice serializes its push-backs
//! behind its own lock.

use std::sync::Mutex;

use rayon::prelude::*;
use strata_geom::{point, Point};

use crate::config::Config;
use crate::mesh::{Mesh, Triangle};

/// An oriented 2D segment of one slice plane. Temporary: consumed by
/// stitching.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Segment {
    pub a: Point,
    pub b: Point,
}

/// Number of slice planes of a model of height `max_z`.
pub fn layer_count(max_z: f64, layer_height: f64) -> usize {
    let end = (max_z / layer_height + 0.5001).floor() as i64;
    end.max(0) as usize
}

/// The `[start, end)` plane index range a triangle spans. Rounding uses an
/// asymmetric epsilon so that a vertex resting exactly on a plane is not
/// double counted; negative z is clipped to zero.
fn plane_range(t: &Triangle, layer_height: f64) -> (usize, usize) {
    let start = (t.min_z() / layer_height + 0.4999).floor() as i64;
    let end = (t.max_z() / layer_height + 0.5001).floor() as i64;
    (start.max(0) as usize, end.max(0) as usize)
}

/// Intersection of triangle edge `p -> q` with the plane at `z`.
fn edge_crossing(p: [f64; 3], q: [f64; 3], z: f64) -> Point {
    let dz = q[2] - p[2];
    let t = if dz == 0.0 { 0.0 } else { (z - p[2]) / dz };
    point(p[0] + (q[0] - p[0]) * t, p[1] + (q[1] - p[1]) * t)
}

/// Cut one triangle with the plane at `z`.
///
/// Vertices are classified below / not-below; the lone vertex on one side
/// picks the two straddling edges, and the emission order is fixed so that
/// an outward-normal mesh stitches into counter-clockwise outer contours.
fn cut_triangle(t: &Triangle, z: f64) -> Option<Segment> {
    let below = [t.v[0][2] < z, t.v[1][2] < z, t.v[2][2] < z];
    let below_count = below.iter().filter(|&&b| b).count();
    if below_count == 0 || below_count == 3 {
        return None;
    }

    // Index of the vertex alone on its side of the plane.
    let lone_below = below_count == 1;
    let k = (0..3)
        .find(|&i| below[i] == lone_below)
        .expect("one vertex is alone on its side");
    let leaving = edge_crossing(t.v[k], t.v[(k + 1) % 3], z);
    let entering = edge_crossing(t.v[(k + 2) % 3], t.v[k], z);

    let seg = if lone_below {
        Segment {
            a: entering,
            b: leaving,
        }
    } else {
        Segment {
            a: leaving,
            b: entering,
        }
    };
    if seg.a == seg.b {
        None
    } else {
        Some(seg)
    }
}

/// Cut the whole mesh into per-slice segment sets.
pub fn extract_segments(mesh: &Mesh, cfg: &Config, layers: usize) -> Vec<Vec<Segment>> {
    let slices: Vec<Mutex<Vec<Segment>>> = (0..layers).map(|_| Mutex::new(Vec::new())).collect();

    mesh.triangles.par_iter().for_each(|t| {
        let (start, end) = plane_range(t, cfg.s.layer_height);
        for i in start..end.min(layers) {
            if let Some(seg) = cut_triangle(t, cfg.plane_z(i)) {
                slices[i].lock().expect("slice lock poisoned").push(seg);
            }
        }
    });

    slices
        .into_iter()
        .map(|m| m.into_inner().expect("slice lock poisoned"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::mesh::shapes::cuboid;

    fn cfg() -> Config {
        Config::new(Settings::default()).unwrap()
    }

    #[test]
    fn cube_layer_count() {
        assert_eq!(layer_count(10.0, 0.2), 50);
        assert_eq!(layer_count(0.0, 0.2), 0);
    }

    #[test]
    fn every_layer_of_a_cube_gets_a_ring_of_segments() {
        let mesh = cuboid([0.0, 0.0, 0.0], [10.0, 10.0, 10.0]);
        let cfg = cfg();
        let layers = layer_count(mesh.max_z(), cfg.s.layer_height);
        let per_slice = extract_segments(&mesh, &cfg, layers);
        assert_eq!(per_slice.len(), 50);
        for (i, segs) in per_slice.iter().enumerate() {
            // Four side faces, two triangles each; every triangle crossing the
            // plane contributes one segment.
            assert_eq!(segs.len(), 8, "layer {}", i);
            let z = cfg.plane_z(i);
            for s in segs {
                // Segment endpoints lie on the cube's side faces.
                for p in [s.a, s.b] {
                    let on_x = p.x.abs() < 1e-9 || (p.x - 10.0).abs() < 1e-9;
                    let on_y = p.y.abs() < 1e-9 || (p.y - 10.0).abs() < 1e-9;
                    assert!(on_x || on_y, "layer {} z {} point {:?}", i, z, p);
                }
            }
        }
    }

    #[test]
    fn side_face_segments_run_counter_clockwise() {
        // A single +x facing triangle of a 10mm cube wall.
        let t = Triangle {
            v: [[10.0, 0.0, 0.0], [10.0, 10.0, 0.0], [10.0, 10.0, 10.0]],
        };
        let seg = cut_triangle(&t, 5.0).unwrap();
        // On the +x face of a solid, the boundary travels toward +y.
        assert!(seg.b.y > seg.a.y);
        assert!((seg.a.x - 10.0).abs() < 1e-9);
        assert!((seg.b.x - 10.0).abs() < 1e-9);
    }

    #[test]
    fn lone_vertex_above_flips_orientation() {
        let up = Triangle {
            v: [[10.0, 0.0, 0.0], [10.0, 10.0, 0.0], [10.0, 5.0, 10.0]],
        };
        let down = Triangle {
            v: [[10.0, 10.0, 10.0], [10.0, 0.0, 10.0], [10.0, 5.0, 0.0]],
        };
        // Both are +x facing walls, so both segments must travel toward +y.
        let s1 = cut_triangle(&up, 5.0).unwrap();
        let s2 = cut_triangle(&down, 5.0).unwrap();
        assert!(s1.b.y > s1.a.y);
        assert!(s2.b.y > s2.a.y);
    }

    #[test]
    fn flat_triangle_on_the_plane_is_dropped() {
        let t = Triangle {
            v: [[0.0, 0.0, 5.0], [1.0, 0.0, 5.0], [0.0, 1.0, 5.0]],
        };
        assert!(cut_triangle(&t, 5.0).is_none());
    }

    #[test]
    fn plane_range_clips_negative_z() {
        let t = Triangle {
            v: [[0.0, 0.0, -3.0], [1.0, 0.0, -3.0], [0.0, 1.0, 1.0]],
        };
        let (start, _end) = plane_range(&t, 0.2);
        assert_eq!(start, 0);
    }
}
