//! S3: shells, gap strips and the derived boundary paths.

use geo::{LineString, MultiPolygon, Polygon};
use strata_geom::clip::{ClipCtx, Join};
use strata_geom::polygon::align_ring_seams;

use crate::config::Config;
use crate::island::Island;

/// Rotate every ring of a region so its seam sits at the lowest x + y point.
fn align_seams(mp: &mut MultiPolygon<f64>) {
    let polys = std::mem::take(&mut mp.0);
    mp.0 = polys
        .into_iter()
        .map(|poly| {
            let (mut exterior, mut interiors) = poly.into_inner();
            let mut rings = vec![std::mem::replace(&mut exterior, LineString::new(vec![]))];
            rings.append(&mut interiors);
            align_ring_seams(&mut rings);
            let exterior = rings.remove(0);
            Polygon::new(exterior, rings)
        })
        .collect();
}

/// The thin strip left uncovered between two consecutive shells, with
/// strips narrower than `fill_threshold * extrusion_width` removed.
fn inset_gap(
    ctx: &ClipCtx,
    outer: &MultiPolygon<f64>,
    inner: &MultiPolygon<f64>,
    cfg: &Config,
) -> MultiPolygon<f64> {
    let w = cfg.s.extrusion_width;
    let ft = cfg.s.fill_threshold;
    let between = ctx.difference(outer, inner);
    let shrunk = ctx.offset(&between, -(0.5 + ft / 2.0) * w, Join::Miter);
    ctx.offset(&shrunk, (cfg.s.infill_overlap + ft / 2.0) * w, Join::Miter)
}

/// Build every shell and derived path of one island.
pub fn build_insets(island: &mut Island, cfg: &Config) {
    let ctx = cfg.ctx();
    let w = cfg.s.extrusion_width;

    // insets[0] exists; deeper shells shrink by one extrusion width each,
    // with thin overlapping slivers squeezed out.
    for k in 1..cfg.s.shells {
        let next = ctx.offset_removing(&island.insets[k - 1], -w, w / 2.0, Join::Miter);
        if next.0.is_empty() {
            break;
        }
        island.insets.push(next);
    }

    if cfg.s.fill_inset_gaps && cfg.s.shells >= 2 {
        for k in 0..island.insets.len().saturating_sub(1) {
            let gap = inset_gap(&ctx, &island.insets[k], &island.insets[k + 1], cfg);
            island.inset_gaps.push(gap);
        }
    }

    island.infill_insets = if island.insets.len() == cfg.s.shells {
        ctx.offset(
            &island.insets[cfg.s.shells - 1],
            -cfg.infill_inset_offset(),
            Join::Miter,
        )
    } else {
        MultiPolygon::new(vec![])
    };

    if cfg.s.simplify_insets {
        for inset in island.insets.iter_mut().skip(1) {
            *inset = ctx.simplify(inset, cfg.s.coarseness);
        }
        island.infill_insets = ctx.simplify(&island.infill_insets, cfg.s.coarseness);
    }

    island.boundaries = ctx.offset(&island.insets[0], w / 8.0, Join::Miter);
    island.solid_infill_clip = if cfg.d.solid_infill_clip_offset > 0.0 {
        ctx.offset(
            &island.infill_insets,
            cfg.d.solid_infill_clip_offset,
            Join::Miter,
        )
    } else {
        island.infill_insets.clone()
    };
    island.outer_boundaries = ctx.offset(
        &island.insets[0],
        0.5 * cfg.d.edge_width - cfg.d.edge_offset,
        Join::Miter,
    );
    island.outer_comb_paths = ctx.offset(&island.outer_boundaries, w / 8.0, Join::Miter);
    island.constraining_edge = ctx.offset(&island.infill_insets, -w / 8.0, Join::Miter);

    if cfg.s.align_seams {
        let shells = if cfg.s.align_interior_seams {
            island.insets.len()
        } else {
            1
        };
        for inset in island.insets.iter_mut().take(shells) {
            align_seams(inset);
        }
    }

    // Captured after seam alignment so combing rides the printed geometry.
    island.comb_paths = island.insets[0].clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::island::build_islands;
    use geo::line_string;
    use strata_geom::clip::area;

    fn island(size: f64, settings: Settings) -> (Island, Config) {
        let cfg = Config::new(settings).unwrap();
        let ring = line_string![
            (x: 0.0, y: 0.0),
            (x: size, y: 0.0),
            (x: size, y: size),
            (x: 0.0, y: size),
            (x: 0.0, y: 0.0),
        ];
        let mut islands = build_islands(vec![ring], &cfg, 0);
        assert_eq!(islands.len(), 1);
        let mut isl = islands.remove(0);
        build_insets(&mut isl, &cfg);
        (isl, cfg)
    }

    #[test]
    fn each_shell_nests_strictly_inside_the_previous() {
        let (isl, cfg) = island(20.0, Settings::default());
        assert_eq!(isl.insets.len(), 2);
        let ctx = cfg.ctx();
        for k in 1..isl.insets.len() {
            // Inner minus outer must vanish.
            let escape = ctx.difference(&isl.insets[k], &isl.insets[k - 1]);
            assert!(area(&escape) < 1e-6, "shell {} escapes its parent", k);
            assert!(area(&isl.insets[k]) < area(&isl.insets[k - 1]));
        }
    }

    #[test]
    fn shells_stop_when_there_is_no_room() {
        let mut settings = Settings::default();
        settings.shells = 8;
        // 2mm square cannot hold 8 shells of 0.45mm.
        let (isl, _) = island(2.0, settings);
        assert!(isl.insets.len() < 8);
        assert!(isl.infill_insets.0.is_empty());
    }

    #[test]
    fn infill_insets_sit_inside_the_innermost_shell() {
        let (isl, cfg) = island(20.0, Settings::default());
        let ctx = cfg.ctx();
        assert!(!isl.infill_insets.0.is_empty());
        let escape = ctx.difference(&isl.infill_insets, isl.insets.last().unwrap());
        assert!(area(&escape) < 1e-6);
    }

    #[test]
    fn boundaries_grow_outward() {
        let (isl, _) = island(20.0, Settings::default());
        assert!(area(&isl.boundaries) > area(&isl.insets[0]));
        assert!(area(&isl.outer_boundaries) > area(&isl.boundaries));
        assert!(area(&isl.outer_comb_paths) > area(&isl.outer_boundaries));
    }

    #[test]
    fn seams_sit_at_the_lowest_corner() {
        let (isl, _) = island(20.0, Settings::default());
        for mp in &isl.insets {
            for poly in &mp.0 {
                let ring = poly.exterior();
                let first = ring.0[0];
                for c in &ring.0 {
                    assert!(first.x + first.y <= c.x + c.y + 1e-9);
                }
            }
        }
    }

    #[test]
    fn square_with_no_gap_has_empty_gap_strips() {
        // A large square's shells fit exactly; the gap strip between them
        // is squeezed out by the fill threshold.
        let (isl, _) = island(20.0, Settings::default());
        for gap in &isl.inset_gaps {
            assert!(area(gap) < 1e-3);
        }
    }
}
