//! S6: support maps, interfaces and fill lines.
//!
//! Overhangs are detected per layer against the previous layer's outline
//! expanded by the printable slope, extended downward layer by layer until
//! they land on something, split into interface and body regions, and
//! intersected with the global support patterns.
//!
//! Downward extension computes its per-target-layer contributions in
//! parallel against a read-only view and merges them afterwards; no slice
//! is mutated from two threads.

use geo::{LineString, MultiLineString, MultiPolygon};
use rayon::prelude::*;
use strata_geom::clip::{ClipCtx, Join};

use crate::config::Config;
use crate::patterns::Patterns;
use crate::Slice;

/// Per-layer support geometry.
#[derive(Clone, Debug)]
pub struct SupportLayer {
    /// Region support material must occupy on this layer.
    pub map: MultiPolygon<f64>,
    /// Model outline grown by the support margin; support never enters.
    pub boundaries: MultiPolygon<f64>,
    /// Grown map consulted by neighbours when splitting off interfaces.
    pub interface_clip: MultiPolygon<f64>,
    /// Body fill lines.
    pub lines: MultiLineString<f64>,
    /// Interface fill lines, denser and perpendicular.
    pub interface_lines: MultiLineString<f64>,
}

impl Default for SupportLayer {
    fn default() -> Self {
        SupportLayer {
            map: MultiPolygon::new(vec![]),
            boundaries: MultiPolygon::new(vec![]),
            interface_clip: MultiPolygon::new(vec![]),
            lines: MultiLineString::new(vec![]),
            interface_lines: MultiLineString::new(vec![]),
        }
    }
}

fn outlines_union(ctx: &ClipCtx, slice: &Slice) -> MultiPolygon<f64> {
    ctx.union_all(slice.islands.iter().map(|isl| isl.insets[0].clone()))
}

fn to_segments(mls: MultiLineString<f64>) -> MultiLineString<f64> {
    MultiLineString::new(
        mls.0
            .into_iter()
            .filter(|ls| ls.0.len() >= 2)
            .map(|ls| LineString::new(vec![ls.0[0], ls.0[ls.0.len() - 1]]))
            .collect(),
    )
}

/// Margin between support material and the model, in millimeters.
fn support_clearance(cfg: &Config) -> f64 {
    (0.5 + cfg.s.support_margin) * cfg.d.edge_width - cfg.d.edge_offset
}

pub fn build_support(slices: &mut [Slice], cfg: &Config, patterns: &Patterns) {
    if !cfg.s.generate_support || slices.is_empty() {
        return;
    }
    let ctx = cfg.ctx();
    let n = slices.len();
    let vm = cfg.s.support_vert_margin;
    let clearance = support_clearance(cfg);

    // Keep-out boundary of every layer.
    let boundaries: Vec<MultiPolygon<f64>> = slices
        .par_iter()
        .map(|slice| ctx.offset(&outlines_union(&ctx, slice), clearance, Join::Miter))
        .collect();

    // Overhang of every layer: what sticks out past the previous layer's
    // outline grown by the printable slope.
    let slope = cfg.s.support_angle.to_radians().tan() * cfg.s.layer_height;
    let overhangs: Vec<MultiPolygon<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            if i <= vm {
                return MultiPolygon::new(vec![]);
            }
            let here = outlines_union(&ctx, &slices[i]);
            if here.0.is_empty() {
                return MultiPolygon::new(vec![]);
            }
            let prev = ctx.offset(&outlines_union(&ctx, &slices[i - 1]), slope, Join::Miter);
            let raw = ctx.difference(&here, &prev);
            ctx.offset(
                &raw,
                cfg.s.support_xy_expansion + clearance,
                Join::Square,
            )
        })
        .collect();

    // Extend each overhang down toward the build plate, clipping against
    // the keep-out boundaries of a +-vert_margin window around each layer.
    let stacks: Vec<Vec<(usize, MultiPolygon<f64>)>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut region = overhangs[i].clone();
            let mut stack = Vec::new();
            if region.0.is_empty() || i < 1 + vm {
                return stack;
            }
            let top = i - 1 - vm;
            let mut reached_plate = false;
            for j in (0..=top).rev() {
                let lo = j.saturating_sub(vm);
                let hi = (j + vm).min(n - 1);
                for b in &boundaries[lo..=hi] {
                    region = ctx.difference(&region, b);
                    if region.0.is_empty() {
                        break;
                    }
                }
                if region.0.is_empty() {
                    break;
                }
                stack.push((j, region.clone()));
                if j == 0 {
                    reached_plate = true;
                }
            }
            if !cfg.s.support_everywhere && !reached_plate {
                stack.clear();
            }
            stack
        })
        .collect();

    let mut maps: Vec<Vec<MultiPolygon<f64>>> = (0..n).map(|_| Vec::new()).collect();
    for stack in stacks {
        for (j, region) in stack {
            maps[j].push(region);
        }
    }
    // Stacks from different overhangs can land on the same layer and
    // overlap; the non-zero union keeps the overlap (an even-odd fold
    // would cancel it).
    let mut maps: Vec<MultiPolygon<f64>> = maps
        .into_par_iter()
        .map(|parts| ctx.union_all(parts))
        .collect();

    // Second pruning pass: anything that never touched the plate under the
    // accumulated model footprint is dropped.
    if !cfg.s.support_everywhere {
        let mut covered = MultiPolygon::new(vec![]);
        for (j, map) in maps.iter_mut().enumerate() {
            if !map.0.is_empty() {
                let kept: Vec<_> = map
                    .0
                    .drain(..)
                    .filter(|poly| {
                        let alone = ctx.difference(
                            &MultiPolygon::new(vec![poly.clone()]),
                            &covered,
                        );
                        !alone.0.is_empty()
                    })
                    .collect();
                map.0 = kept;
            }
            covered = ctx.union(&covered, &boundaries[j]);
        }
    }

    let want_interface = cfg.s.interface_roof_layers > 0 || cfg.s.interface_floor_layers > 0;
    let interface_clip_offset = (cfg.s.support_angle.to_radians().tan() * cfg.s.layer_height)
        .min(cfg.s.support_xy_expansion + clearance);
    let interface_clips: Vec<MultiPolygon<f64>> = if want_interface {
        maps.par_iter()
            .map(|map| ctx.offset(map, interface_clip_offset, Join::Square))
            .collect()
    } else {
        (0..n).map(|_| MultiPolygon::new(vec![])).collect()
    };

    let layers: Vec<SupportLayer> = (0..n)
        .into_par_iter()
        .map(|i| {
            let map = maps[i].clone();
            if map.0.is_empty() {
                return SupportLayer {
                    map,
                    boundaries: boundaries[i].clone(),
                    ..SupportLayer::default()
                };
            }

            // Body is where support continues through the full roof/floor
            // window; everything else is interface.
            let mut body = map.clone();
            if want_interface {
                for k in 1..=cfg.s.interface_roof_layers {
                    let j = i + k;
                    if j >= n {
                        body = MultiPolygon::new(vec![]);
                        break;
                    }
                    body = ctx.intersection(&body, &interface_clips[j]);
                    if body.0.is_empty() {
                        break;
                    }
                }
                for k in 1..=cfg.s.interface_floor_layers {
                    if body.0.is_empty() {
                        break;
                    }
                    match i.checked_sub(k) {
                        Some(j) => body = ctx.intersection(&body, &interface_clips[j]),
                        None => body = MultiPolygon::new(vec![]),
                    }
                }
            }
            let mut interface = ctx.difference(&map, &body);
            if cfg.s.expand_interface && !interface.0.is_empty() {
                let grow = cfg.s.extrusion_width / cfg.s.support_density;
                interface = ctx.intersection(&ctx.offset(&interface, grow, Join::Square), &map);
                body = ctx.difference(&map, &interface);
            }

            let solid_base = cfg.s.solid_support_base && i == 0;
            let (lines, interface_lines) = if solid_base {
                (
                    MultiLineString::new(vec![]),
                    to_segments(ctx.clip_lines(&map, &patterns.solid_base)),
                )
            } else {
                (
                    to_segments(ctx.clip_lines(&body, &patterns.support)),
                    to_segments(ctx.clip_lines(&interface, &patterns.support_interface)),
                )
            };

            SupportLayer {
                map,
                boundaries: boundaries[i].clone(),
                interface_clip: interface_clips[i].clone(),
                lines,
                interface_lines,
            }
        })
        .collect();

    for (slice, layer) in slices.iter_mut().zip(layers) {
        slice.support = layer;
    }
}
