//! Island construction: stitched rings to per-layer build regions.
//!
//! An island is one connected top-level outer contour plus its immediate
//! holes. Deeper nesting (an outer contour inside a hole) becomes its own
//! island. The engine's boolean output already groups outer contours with
//! their immediate holes, so islands fall out of the union + inward offset
//! of the stitched outlines; the containment forest below only exists to
//! hand the engine correctly structured polygons under the non-zero rule.

use geo::coordinate_position::{CoordPos, CoordinatePosition};
use geo::{LineString, MultiLineString, MultiPolygon, Polygon, Winding};
use log::warn;
use strata_geom::aabb::Aabb;
use strata_geom::clip::Join;
use strata_geom::polygon::{is_ccw, ring_area};

use crate::config::{Config, PolyFillRule};

/// One connected build region of a layer, with everything later stages
/// derive from it. `insets[0]` always exists and is non-empty for a valid
/// island; the other fields start empty and are filled by S3/S5.
#[derive(Clone, Debug)]
pub struct Island {
    /// Shell paths, outermost first. `insets[k]` is `insets[k-1]` offset
    /// inward by one extrusion width.
    pub insets: Vec<MultiPolygon<f64>>,
    /// Region available to infill, inside the innermost shell.
    pub infill_insets: MultiPolygon<f64>,
    /// Thin strips between consecutive shells that need dedicated fill,
    /// one entry per shell pair.
    pub inset_gaps: Vec<MultiPolygon<f64>>,
    /// Slightly grown outline used for retract-crossing tests.
    pub boundaries: MultiPolygon<f64>,
    /// Infill region grown by the clip offset; neighbouring layers consult
    /// it when deciding what needs solid fill.
    pub solid_infill_clip: MultiPolygon<f64>,
    /// Outline grown to the outer edge stroke, for inter-island combing.
    pub outer_boundaries: MultiPolygon<f64>,
    /// Slightly grown `outer_boundaries`, the paths combing actually rides.
    pub outer_comb_paths: MultiPolygon<f64>,
    /// Copy of `insets[0]` taken before planning consumes the shells.
    pub comb_paths: MultiPolygon<f64>,
    /// Shrunk infill region; connecting two fill lines is only safe inside.
    pub constraining_edge: MultiPolygon<f64>,
    /// Part of this layer's top not covered by the layer above.
    pub exposed_surface: MultiPolygon<f64>,
    /// Ironing pass lines over the exposed top surface.
    pub iron_lines: MultiLineString<f64>,
    /// Solid fill lines (S5).
    pub solid_lines: MultiLineString<f64>,
    /// Sparse fill lines (S5).
    pub sparse_lines: MultiLineString<f64>,
    /// Grown solid region, consulted by infill smoothing.
    pub solid_boundaries: MultiPolygon<f64>,
    /// Lattice bounding box of `insets[0]`, for cheap rejects.
    pub bbox: Aabb,
}

impl Island {
    fn from_region(outer: Polygon<f64>, cfg: &Config) -> Island {
        let ctx = cfg.ctx();
        let region = MultiPolygon::new(vec![outer]);
        let region = ctx.simplify(&region, cfg.s.coarseness);
        let bbox = Aabb::from_polygons(&region, cfg.s.scale_constant);
        Island {
            insets: vec![region],
            infill_insets: MultiPolygon::new(vec![]),
            inset_gaps: Vec::new(),
            boundaries: MultiPolygon::new(vec![]),
            solid_infill_clip: MultiPolygon::new(vec![]),
            outer_boundaries: MultiPolygon::new(vec![]),
            outer_comb_paths: MultiPolygon::new(vec![]),
            comb_paths: MultiPolygon::new(vec![]),
            constraining_edge: MultiPolygon::new(vec![]),
            exposed_surface: MultiPolygon::new(vec![]),
            iron_lines: MultiLineString::new(vec![]),
            solid_lines: MultiLineString::new(vec![]),
            sparse_lines: MultiLineString::new(vec![]),
            solid_boundaries: MultiPolygon::new(vec![]),
            bbox,
        }
    }

    pub fn outline(&self) -> &MultiPolygon<f64> {
        &self.insets[0]
    }
}

/// A vertex of `ring` strictly inside or outside `candidate`, skipping
/// boundary contact.
fn strictly_classified(ring: &LineString<f64>, candidate: &Polygon<f64>) -> Option<bool> {
    ring.0.iter().find_map(|c| match candidate.coordinate_position(c) {
        CoordPos::Inside => Some(true),
        CoordPos::Outside => Some(false),
        CoordPos::OnBoundary => None,
    })
}

/// Group stitched rings into polygons with holes using containment depth.
fn containment_forest(rings: Vec<LineString<f64>>, slice: usize) -> MultiPolygon<f64> {
    let mut order: Vec<usize> = (0..rings.len()).collect();
    let areas: Vec<f64> = rings.iter().map(ring_area).collect();
    order.sort_by(|&a, &b| {
        areas[b]
            .abs()
            .partial_cmp(&areas[a].abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut depth = vec![0usize; rings.len()];
    let mut parent = vec![usize::MAX; rings.len()];
    for (pos, &i) in order.iter().enumerate() {
        // Deepest container among the (larger) rings already placed.
        for &j in order[..pos].iter().rev() {
            let candidate = Polygon::new(rings[j].clone(), vec![]);
            if strictly_classified(&rings[i], &candidate) == Some(true)
                && depth[j] + 1 > depth[i]
            {
                depth[i] = depth[j] + 1;
                parent[i] = j;
            }
        }
    }

    let mut polys: Vec<Polygon<f64>> = Vec::new();
    let mut slot = vec![usize::MAX; rings.len()];
    for &i in &order {
        if depth[i] % 2 == 0 {
            let mut ring = rings[i].clone();
            if !is_ccw(&ring) {
                warn!("slice {}: outer contour orientation reversed", slice);
                ring.make_ccw_winding();
            }
            slot[i] = polys.len();
            polys.push(Polygon::new(ring, vec![]));
        }
    }
    for &i in &order {
        if depth[i] % 2 == 1 {
            let mut ring = rings[i].clone();
            if is_ccw(&ring) {
                warn!("slice {}: hole contour orientation reversed", slice);
                ring.make_cw_winding();
            }
            if parent[i] == usize::MAX {
                continue;
            }
            let p = slot[parent[i]];
            if p != usize::MAX {
                polys[p].interiors_push(ring);
            }
        }
    }
    MultiPolygon::new(polys)
}

/// Build the islands of one slice from its stitched rings.
pub fn build_islands(rings: Vec<LineString<f64>>, cfg: &Config, slice: usize) -> Vec<Island> {
    if rings.is_empty() {
        return Vec::new();
    }
    let ctx = cfg.ctx();

    let region = if cfg.s.combine_all || cfg.s.poly_fill_rule == PolyFillRule::EvenOdd {
        ctx.union_even_odd(
            rings
                .into_iter()
                .map(|r| MultiPolygon::new(vec![Polygon::new(r, vec![])])),
        )
    } else {
        let forest = containment_forest(rings, slice);
        // One engine pass merges any overlap left by a broken mesh.
        ctx.normalize(&forest)
    };

    // Shrink the outline to the centerline of the outer stroke.
    let edge_overlap = cfg.d.edge_width * (1.0 - cfg.s.seam_packing_density);
    let delta0 = cfg.d.edge_offset + cfg.s.extra_offset + edge_overlap / 2.0;
    let shrunk = ctx.offset(&region, delta0, Join::Miter);

    shrunk
        .0
        .into_iter()
        .map(|poly| Island::from_region(poly, cfg))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use geo::line_string;

    fn cfg() -> Config {
        Config::new(Settings::default()).unwrap()
    }

    fn square_ring(x0: f64, y0: f64, size: f64, ccw: bool) -> LineString<f64> {
        let mut ring = line_string![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
            (x: x0, y: y0),
        ];
        if !ccw {
            ring.0.reverse();
        }
        ring
    }

    #[test]
    fn single_ring_becomes_one_island() {
        let islands = build_islands(vec![square_ring(0.0, 0.0, 10.0, true)], &cfg(), 0);
        assert_eq!(islands.len(), 1);
        assert_eq!(islands[0].insets[0].0.len(), 1);
        assert!(!islands[0].bbox.is_empty());
    }

    #[test]
    fn hole_attaches_to_its_outer() {
        let islands = build_islands(
            vec![
                square_ring(0.0, 0.0, 20.0, true),
                square_ring(5.0, 5.0, 10.0, false),
            ],
            &cfg(),
            0,
        );
        assert_eq!(islands.len(), 1);
        let outline = &islands[0].insets[0];
        assert_eq!(outline.0.len(), 1);
        assert_eq!(outline.0[0].interiors().len(), 1);
    }

    #[test]
    fn ring_nested_in_hole_is_its_own_island() {
        let islands = build_islands(
            vec![
                square_ring(0.0, 0.0, 30.0, true),
                square_ring(5.0, 5.0, 20.0, false),
                square_ring(10.0, 10.0, 10.0, true),
            ],
            &cfg(),
            0,
        );
        assert_eq!(islands.len(), 2);
    }

    #[test]
    fn separate_rings_become_separate_islands() {
        let islands = build_islands(
            vec![
                square_ring(0.0, 0.0, 10.0, true),
                square_ring(20.0, 0.0, 10.0, true),
            ],
            &cfg(),
            0,
        );
        assert_eq!(islands.len(), 2);
    }

    #[test]
    fn outline_is_shrunk_by_the_edge_offset() {
        let cfg = cfg();
        let islands = build_islands(vec![square_ring(0.0, 0.0, 10.0, true)], &cfg, 0);
        let (x0, y0, x1, y1) = islands[0].bbox.to_mm(cfg.s.scale_constant);
        // edge_offset is negative; the outline moves inward by roughly it.
        assert!(x0 > 0.0 && y0 > 0.0 && x1 < 10.0 && y1 < 10.0);
        let expected_inset = -(cfg.d.edge_offset + cfg.s.extra_offset);
        assert!((x0 - (expected_inset - cfg.d.edge_width * (1.0 - cfg.s.seam_packing_density) / 2.0)).abs() < 0.02);
    }

    #[test]
    fn wrong_winding_is_repaired() {
        // Outer ring stitched clockwise: still one island with one hole.
        let islands = build_islands(
            vec![
                square_ring(0.0, 0.0, 20.0, false),
                square_ring(5.0, 5.0, 10.0, true),
            ],
            &cfg(),
            0,
        );
        assert_eq!(islands.len(), 1);
        assert_eq!(islands[0].insets[0].0[0].interiors().len(), 1);
    }
}
