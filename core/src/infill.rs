//! S5: solid and sparse infill regions and their fill lines.
//!
//! Each slice reads the stable `insets[0]` / `solid_infill_clip` fields of
//! its roof/floor neighbours and writes only its own islands, so slices are
//! processed in parallel against an immutable view and the results written
//! back afterwards.

use euclid::Angle;
use geo::{LineString, MultiLineString, MultiPolygon};
use rayon::prelude::*;
use strata_geom::aabb::Aabb;
use strata_geom::clip::{ClipCtx, Join};
use strata_geom::line::distance;
use strata_geom::pattern::line_fill_at_angle;

use crate::config::Config;
use crate::patterns::{solid_angle, sparse_passes};
use crate::Slice;

struct IslandFill {
    exposed_surface: MultiPolygon<f64>,
    iron_lines: MultiLineString<f64>,
    solid_lines: MultiLineString<f64>,
    sparse_lines: MultiLineString<f64>,
    solid_boundaries: MultiPolygon<f64>,
}

/// Straight clipped spans come back as polylines; reduce each to its two
/// endpoints.
fn to_segments(mls: MultiLineString<f64>) -> MultiLineString<f64> {
    MultiLineString::new(
        mls.0
            .into_iter()
            .filter(|ls| ls.0.len() >= 2)
            .map(|ls| LineString::new(vec![ls.0[0], ls.0[ls.0.len() - 1]]))
            .collect(),
    )
}

fn polyline_length(ls: &LineString<f64>) -> f64 {
    ls.0.windows(2).map(|w| distance(w[0], w[1])).sum()
}

fn drop_short(mls: MultiLineString<f64>, min_len: f64) -> MultiLineString<f64> {
    MultiLineString::new(
        mls.0
            .into_iter()
            .filter(|ls| polyline_length(ls) >= min_len)
            .collect(),
    )
}

/// Union of `insets[0]` of the neighbour layer's islands whose box
/// intersects `bbox`.
fn neighbour_outlines(ctx: &ClipCtx, slice: &Slice, bbox: &Aabb) -> MultiPolygon<f64> {
    ctx.union_all(
        slice
            .islands
            .iter()
            .filter(|isl| isl.bbox.intersects(bbox))
            .map(|isl| isl.insets[0].clone()),
    )
}

fn neighbour_solid_clip(ctx: &ClipCtx, slice: &Slice, bbox: &Aabb) -> MultiPolygon<f64> {
    ctx.union_all(
        slice
            .islands
            .iter()
            .filter(|isl| isl.bbox.intersects(bbox))
            .map(|isl| isl.solid_infill_clip.clone()),
    )
}

fn island_fill(slices: &[Slice], i: usize, island_idx: usize, cfg: &Config) -> IslandFill {
    let ctx = cfg.ctx();
    let w = cfg.s.extrusion_width;
    let n = slices.len();
    let island = &slices[i].islands[island_idx];
    let bbox = island.bbox;
    let bounds = bbox.inflate((w * cfg.s.scale_constant) as i64).to_mm(cfg.s.scale_constant);

    // Region of this layer's top left uncovered by the layer above; travel
    // across it risks scarring a visible surface.
    let exposed_surface = if cfg.d.roof_layers > 0 {
        if i + 1 >= n {
            island.infill_insets.clone()
        } else {
            let above = neighbour_outlines(&ctx, &slices[i + 1], &bbox);
            ctx.offset(
                &ctx.difference(&island.infill_insets, &above),
                -w,
                Join::Miter,
            )
        }
    } else {
        MultiPolygon::new(vec![])
    };

    let iron_lines = if cfg.s.iron_top_surface {
        let base = ctx.offset(&island.insets[0], -w / 2.0, Join::Miter);
        let uncovered = if i + 1 >= n {
            base
        } else {
            ctx.difference(&base, &neighbour_outlines(&ctx, &slices[i + 1], &bbox))
        };
        let cleaned = ctx.offset(
            &ctx.offset(&uncovered, -w / 2.0, Join::Miter),
            w / 2.0,
            Join::Miter,
        );
        let pattern = line_fill_at_angle(
            bounds,
            Angle::degrees(solid_angle(cfg, i)),
            w / cfg.s.iron_density,
        );
        to_segments(ctx.clip_lines(&cleaned, &pattern))
    } else {
        MultiLineString::new(vec![])
    };

    // Solid versus sparse split.
    let full_solid = cfg.s.infill_density >= 1.0 - 1e-9
        || i < cfg.d.floor_layers
        || i + cfg.d.roof_layers >= n;
    let neighbour_solid = cfg.d.floor_layers > 0 || cfg.d.roof_layers > 0;

    let (solid_region, sparse_region) = if full_solid {
        (island.infill_insets.clone(), MultiPolygon::new(vec![]))
    } else if neighbour_solid {
        let mut covered: Option<MultiPolygon<f64>> = None;
        for k in -(cfg.d.floor_layers as i64)..=(cfg.d.roof_layers as i64) {
            if k == 0 {
                continue;
            }
            let j = i as i64 + k;
            debug_assert!(j >= 0 && (j as usize) < n);
            let clip = neighbour_solid_clip(&ctx, &slices[j as usize], &bbox);
            covered = Some(match covered {
                None => clip,
                Some(acc) => ctx.intersection(&acc, &clip),
            });
            if covered.as_ref().map_or(false, |c| c.0.is_empty()) {
                break;
            }
        }
        let covered = covered.unwrap_or_else(|| MultiPolygon::new(vec![]));
        let mut solid = ctx.difference(&island.infill_insets, &covered);
        // Fill-threshold removal: squeeze out slivers of solid fill.
        let ft = cfg.s.fill_threshold;
        solid = ctx.offset(
            &ctx.offset(&solid, -ft * w / 2.0, Join::Miter),
            ft * w / 2.0,
            Join::Miter,
        );
        if !solid.0.is_empty() && cfg.s.solid_fill_expansion > 0.0 {
            let grow = cfg.d.solid_infill_clip_offset + cfg.s.solid_fill_expansion * w;
            solid = ctx.intersection(
                &ctx.offset(&solid, grow, Join::Square),
                &island.infill_insets,
            );
        }
        let sparse = ctx.difference(&island.infill_insets, &solid);
        (solid, sparse)
    } else {
        (MultiPolygon::new(vec![]), island.infill_insets.clone())
    };

    // Solid lines: the alternating rectilinear pattern clipped to the solid
    // region, plus every inset-gap strip (gap strips are always solid).
    let solid_pattern = line_fill_at_angle(bounds, Angle::degrees(solid_angle(cfg, i)), w);
    let mut solid_lines = Vec::new();
    solid_lines.extend(to_segments(ctx.clip_lines(&solid_region, &solid_pattern)).0);
    if cfg.s.fill_inset_gaps {
        for gap in &island.inset_gaps {
            solid_lines.extend(to_segments(ctx.clip_lines(gap, &solid_pattern)).0);
        }
    }

    let mut sparse_lines = Vec::new();
    if !sparse_region.0.is_empty() {
        for (angle, spacing) in sparse_passes(cfg, i) {
            let pattern = line_fill_at_angle(bounds, Angle::degrees(angle), spacing);
            sparse_lines.extend(to_segments(ctx.clip_lines(&sparse_region, &pattern)).0);
        }
    }
    let sparse_lines = drop_short(
        MultiLineString::new(sparse_lines),
        cfg.s.min_sparse_infill_len,
    );

    let solid_boundaries = ctx.offset(&solid_region, w / 8.0, Join::Miter);

    IslandFill {
        exposed_surface,
        iron_lines,
        solid_lines: MultiLineString::new(solid_lines),
        sparse_lines,
        solid_boundaries,
    }
}

/// Fill every island of every slice.
pub fn build_infill(slices: &mut [Slice], cfg: &Config) {
    let results: Vec<Vec<IslandFill>> = {
        let view: &[Slice] = slices;
        (0..view.len())
            .into_par_iter()
            .map(|i| {
                (0..view[i].islands.len())
                    .map(|k| island_fill(view, i, k, cfg))
                    .collect()
            })
            .collect()
    };
    for (slice, fills) in slices.iter_mut().zip(results) {
        for (island, fill) in slice.islands.iter_mut().zip(fills) {
            island.exposed_surface = fill.exposed_surface;
            island.iron_lines = fill.iron_lines;
            island.solid_lines = fill.solid_lines;
            island.sparse_lines = fill.sparse_lines;
            island.solid_boundaries = fill.solid_boundaries;
        }
    }
}
