//! Line scheduling: infill, ironing, support, raft and brim emission.

use geo::{LineString, MultiLineString};
use itertools::Itertools;
use ordered_float::OrderedFloat;
use strata_core::brim::BrimRaft;
use strata_core::island::Island;
use strata_core::Slice;
use strata_geom::line::{distance, lerp, square_distance};
use strata_geom::Point;

use crate::comb::crosses_region;
use crate::planner::{Planner, TravelKind};
use crate::shells::{emit_closed_path, ClosedPathOptions};

/// A fill segment still waiting to be printed.
#[derive(Copy, Clone, Debug)]
struct FillSeg {
    a: Point,
    b: Point,
}

impl FillSeg {
    fn len(&self) -> f64 {
        distance(self.a, self.b)
    }

    /// Oriented so the start is the endpoint nearest `p`.
    fn towards(&self, p: Point) -> FillSeg {
        if square_distance(self.a, p) <= square_distance(self.b, p) {
            *self
        } else {
            FillSeg {
                a: self.b,
                b: self.a,
            }
        }
    }
}

fn segments_of(lines: &MultiLineString<f64>) -> Vec<FillSeg> {
    lines
        .0
        .iter()
        .filter(|ls| ls.0.len() >= 2)
        .map(|ls| FillSeg {
            a: ls.0[0],
            b: ls.0[ls.0.len() - 1],
        })
        .collect()
}

fn nearest_seg(segs: &[FillSeg], p: Point) -> Option<usize> {
    segs.iter()
        .position_min_by_key(|s| OrderedFloat(square_distance(s.a, p).min(square_distance(s.b, p))))
}

/// Greedy nearest-endpoint scheduling: travel to the closest line end,
/// extrude to the other end, repeat.
pub fn plan_lines_simple(
    pl: &mut Planner,
    lines: &MultiLineString<f64>,
    feed: f64,
    flow: f64,
    kind: TravelKind,
) {
    let mut segs = segments_of(lines);
    while let Some(i) = nearest_seg(&segs, pl.position()) {
        let seg = segs.swap_remove(i).towards(pl.position());
        pl.travel_to(seg.a, kind);
        pl.extrude_len_to(seg.b, feed, seg.len() * flow);
    }
}

/// Smoothed solid infill: zig-zag scan lines are chained, with very short
/// neighbours merged into midpoint glides and adjacent opposite lines
/// joined by a connecting extrusion instead of a travel.
pub fn plan_solid_smoothed(pl: &mut Planner, island: &Island, feed: f64) {
    let cfg = pl.cfg;
    let w = cfg.s.extrusion_width;
    let smooth_limit = cfg.s.infill_smooth_threshold * w * 2.0;
    let connect_limit = w * (1.0 + 1.0 / 8.0);
    let shortening = w * (0.5 - cfg.s.infill_overlap).max(0.0);
    let connect_flow = (1.0 - 2.0 * cfg.s.infill_overlap).max(0.0);
    let ctx = cfg.ctx();

    let mut segs = segments_of(&island.solid_lines);
    let Some(first) = nearest_seg(&segs, pl.position()) else {
        return;
    };
    let mut cur = segs.swap_remove(first).towards(pl.position());
    pl.travel_to(cur.a, TravelKind::Infill);

    loop {
        // Prefer the adjacent, opposite-direction neighbour one line over.
        let next_idx = segs.iter().position_min_by_key(|s| {
            let s = s.towards(cur.b);
            let d = distance(s.a, cur.b);
            let dir_cur = (cur.b.x - cur.a.x, cur.b.y - cur.a.y);
            let dir_s = (s.b.x - s.a.x, s.b.y - s.a.y);
            let opposite = dir_cur.0 * dir_s.0 + dir_cur.1 * dir_s.1 < 0.0;
            let preferred = opposite && d <= connect_limit * 1.5;
            OrderedFloat(if preferred { d * 0.25 } else { d })
        });

        let Some(i) = next_idx else {
            pl.extrude_to(cur.b, feed, 1.0);
            break;
        };
        let next = segs.swap_remove(i).towards(cur.b);
        let gap = distance(cur.b, next.a);

        let cur_len = cur.len();
        let next_len = next.len();
        let mid_cur = lerp(cur.a, cur.b, 0.5);
        let mid_next = lerp(next.a, next.b, 0.5);

        if cur_len < smooth_limit
            && next_len < smooth_limit
            && distance(mid_cur, mid_next) <= connect_limit
        {
            // Tapering sliver: glide midpoint to midpoint, depositing the
            // averaged volume.
            if square_distance(pl.position(), mid_cur) > 1e-18 {
                pl.extrude_to(mid_cur, feed, 1.0);
            }
            let hop = distance(mid_cur, mid_next).max(1e-12);
            let avg = (cur_len + next_len) / 2.0;
            let adjusted = (feed * hop / avg.max(1e-12)).min(cfg.s.travel_feed_rate);
            pl.extrude_len_to(mid_next, adjusted, avg);
            cur = next;
            continue;
        }

        let opposite = {
            let dc = (cur.b.x - cur.a.x, cur.b.y - cur.a.y);
            let dn = (next.b.x - next.a.x, next.b.y - next.a.y);
            dc.0 * dn.0 + dc.1 * dn.1 < 0.0
        };
        let safe_connect = opposite
            && gap <= connect_limit
            && ctx.contains(&island.constraining_edge, cur.b)
            && ctx.contains(&island.constraining_edge, next.a)
            && !crosses_region(cur.b, next.a, &island.solid_boundaries);

        if safe_connect && cur_len > shortening && next_len > shortening {
            // Shorten both lines and bridge them with a light stroke.
            let cur_end = lerp(cur.b, cur.a, shortening / cur_len);
            pl.extrude_to(cur_end, feed, 1.0);
            let next_start = lerp(next.a, next.b, shortening / next_len);
            pl.extrude_to(next_start, feed, connect_flow);
            cur = FillSeg {
                a: next_start,
                b: next.b,
            };
            continue;
        }

        pl.extrude_to(cur.b, feed, 1.0);
        pl.travel_to(next.a, TravelKind::Infill);
        cur = next;
    }
}

/// Infill of one island: solid, ironing pass, then sparse.
pub fn plan_island_fill(pl: &mut Planner, island: &Island, _layer: usize) {
    let cfg = pl.cfg;
    let feed = cfg.s.feed_rate;

    if cfg.s.connect_solid_infill {
        plan_solid_smoothed(pl, island, feed);
    } else {
        plan_lines_simple(pl, &island.solid_lines, feed, 1.0, TravelKind::Infill);
    }

    if cfg.s.iron_top_surface && !island.iron_lines.0.is_empty() {
        let iron_feed = if cfg.s.iron_feed_rate > 0.0 {
            cfg.s.iron_feed_rate
        } else {
            cfg.s.travel_feed_rate
        };
        plan_lines_simple(
            pl,
            &island.iron_lines,
            iron_feed,
            cfg.s.iron_flow_multiplier,
            TravelKind::Infill,
        );
    }

    plan_lines_simple(pl, &island.sparse_lines, feed, 1.0, TravelKind::Infill);
}

/// Support lines: nearest-first with optional connected traversal, wiping
/// along the previous line whenever the hop would cross an island.
fn plan_support_lines(
    pl: &mut Planner,
    lines: &MultiLineString<f64>,
    slice: &Slice,
    flow: f64,
    spacing: f64,
) {
    let cfg = pl.cfg;
    let feed = cfg.s.feed_rate;
    let min_len = cfg.s.min_support_len;
    let connect_threshold = if !cfg.s.connect_support_lines {
        0.0
    } else if cfg.s.support_connect_threshold > 0.0 {
        cfg.s.support_connect_threshold
    } else {
        2.0 * spacing
    };

    let mut segs: Vec<FillSeg> = segments_of(lines)
        .into_iter()
        .filter(|s| s.len() >= min_len)
        .collect();
    let mut prev: Option<FillSeg> = None;

    while let Some(i) = nearest_seg(&segs, pl.position()) {
        let seg = segs.swap_remove(i).towards(pl.position());
        let from = pl.position();
        let hop = distance(from, seg.a);
        let crosses_island = slice
            .islands
            .iter()
            .any(|isl| crosses_region(from, seg.a, &isl.outer_boundaries));

        if prev.is_some() && crosses_island {
            pl.retract();
            if cfg.s.support_wipe_len > 0.0 {
                let p = prev.expect("prev support line exists");
                let back = cfg.s.support_wipe_len.min(p.len());
                if p.len() > 0.0 {
                    let target = lerp(p.b, p.a, back / p.len());
                    pl.push_move(crate::GMove {
                        x: target.x,
                        y: target.y,
                        z: pl.machine.z,
                        e: 0.0,
                        feed: cfg.s.travel_feed_rate,
                        scalable: false,
                        is_travel: true,
                        is_restart: false,
                    });
                }
            }
            pl.travel_to(seg.a, TravelKind::Other);
        } else if prev.is_some() && connect_threshold > 0.0 && hop <= connect_threshold {
            // Close enough: drag a connecting extrusion instead of hopping.
            pl.extrude_to(seg.a, feed, flow);
        } else {
            pl.travel_to(seg.a, TravelKind::Other);
        }

        pl.extrude_to(seg.b, feed, flow);
        prev = Some(seg);
    }
}

/// Support for one layer: interface first, then the body.
pub fn plan_support_layer(pl: &mut Planner, slice: &Slice) {
    let cfg = pl.cfg;
    let w = cfg.s.extrusion_width;
    plan_support_lines(
        pl,
        &slice.support.interface_lines,
        slice,
        cfg.s.support_flow_mult,
        w / cfg.s.interface_density,
    );
    plan_support_lines(
        pl,
        &slice.support.lines,
        slice,
        cfg.s.support_flow_mult,
        w / cfg.s.support_density,
    );
}

/// Raft: the wide base layer, then the interface stack, each at its own z.
pub fn plan_raft(pl: &mut Planner, brim: &BrimRaft) {
    let cfg = pl.cfg;
    pl.set_z(cfg.s.raft_base_layer_height);
    plan_lines_simple(
        pl,
        &brim.raft_base,
        cfg.s.feed_rate,
        brim.raft_flow_adjust,
        TravelKind::Infill,
    );
    for m in 1..=cfg.s.raft_interface_layers {
        pl.set_z(
            cfg.s.raft_base_layer_height
                + cfg.s.raft_vert_margin
                + m as f64 * cfg.s.layer_height,
        );
        pl.machine.force_retract = true;
        plan_lines_simple(
            pl,
            &brim.raft_interface,
            cfg.s.feed_rate,
            1.0,
            TravelKind::Infill,
        );
    }
}

/// Brim rings, nearest-first, innermost last so the outline is printed
/// against already-laid rings.
pub fn plan_brim(pl: &mut Planner, brim: &BrimRaft) {
    let cfg = pl.cfg;
    let mut rings: Vec<&LineString<f64>> = brim
        .rings
        .iter()
        .flat_map(|mp| strata_geom::clip::rings(mp))
        .collect();

    while !rings.is_empty() {
        let from = pl.position();
        let pick = rings
            .iter()
            .position_min_by_key(|r| OrderedFloat(strata_geom::polygon::nearest_vertex(r, from).1))
            .expect("rings is non-empty");
        let ring = rings.swap_remove(pick);
        let start = strata_geom::polygon::nearest_vertex(ring, pl.position()).0;
        emit_closed_path(
            pl,
            ring,
            start,
            ClosedPathOptions {
                feed: cfg.s.feed_rate,
                shell_finish: false,
            },
        );
    }
}
