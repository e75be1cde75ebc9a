//! Shell emission: closed-path moves with seam handling, end clipping,
//! anchoring, coasting, moving retract and wiping, plus inset ordering.

use geo::LineString;
use ordered_float::OrderedFloat;
use strata_core::island::Island;
use strata_geom::line::{distance, lerp, square_distance};
use strata_geom::polygon::{nearest_vertex, ring_len};
use strata_geom::Point;

use crate::planner::{Planner, TravelKind};
use crate::shell_feed;

/// Options for one closed path.
#[derive(Copy, Clone, Debug)]
pub struct ClosedPathOptions {
    pub feed: f64,
    /// Apply end clipping / anchoring / coasting / wiping. Brim rings and
    /// other auxiliary loops run plain.
    pub shell_finish: bool,
}

/// Walk `total` millimeters backward from the end of `pts`, returning the
/// truncated body and the trimmed-off tail (oriented forward).
fn trim_tail(pts: &[Point], total: f64) -> (Vec<Point>, Vec<Point>) {
    if total <= 0.0 {
        return (pts.to_vec(), Vec::new());
    }
    let mut remaining = total;
    let mut cut = pts.len() - 1;
    let mut cut_point = pts[pts.len() - 1];
    for i in (1..pts.len()).rev() {
        let len = distance(pts[i - 1], pts[i]);
        if len >= remaining {
            let t = (len - remaining) / len;
            cut = i;
            cut_point = lerp(pts[i - 1], pts[i], t);
            break;
        }
        remaining -= len;
        if i == 1 {
            // The whole path is shorter than the trim.
            return (vec![pts[0]], pts.to_vec());
        }
    }
    let mut body: Vec<Point> = pts[..cut].to_vec();
    if square_distance(*body.last().expect("non-empty body"), cut_point) > 1e-18 {
        body.push(cut_point);
    }
    let mut tail = vec![cut_point];
    tail.extend_from_slice(&pts[cut..]);
    (body, tail)
}

/// Emit one closed path starting at vertex `start`.
pub fn emit_closed_path(
    pl: &mut Planner,
    ring: &LineString<f64>,
    start: usize,
    opts: ClosedPathOptions,
) {
    let cfg = pl.cfg;
    let n = ring_len(ring);
    if n < 3 {
        return;
    }
    let w = cfg.s.extrusion_width;

    // Rotate so the chosen start comes first, and close the loop.
    let mut pts: Vec<Point> = Vec::with_capacity(n + 1);
    for i in 0..n {
        pts.push(ring.0[(start + i) % n]);
    }
    pts.push(pts[0]);
    let perimeter: f64 = pts.windows(2).map(|p| distance(p[0], p[1])).sum();

    let anchor_len = w / 2.0 * std::f64::consts::FRAC_PI_4;
    let mut total_clip = 0.0;
    let mut anchored = false;
    if opts.shell_finish {
        let clip_len = cfg.s.shell_clip * w;
        if clip_len > 0.0 && perimeter > clip_len * 4.0 {
            total_clip += clip_len;
        }
        if cfg.s.anchor && perimeter > (total_clip + anchor_len) * 4.0 {
            total_clip += anchor_len;
            anchored = true;
        }
    }

    let (mut body, _) = trim_tail(&pts, total_clip);

    // Coasting: the last stretch of the loop rides pressure instead of
    // feeding new material.
    let mut coast: Vec<Point> = Vec::new();
    if opts.shell_finish && cfg.s.coast_len > 0.0 {
        let body_len: f64 = body.windows(2).map(|p| distance(p[0], p[1])).sum();
        if body_len > cfg.s.coast_len * 2.0 {
            let (shorter, tail) = trim_tail(&body, cfg.s.coast_len);
            body = shorter;
            coast = tail;
        }
    }

    pl.travel_to(body[0], TravelKind::Other);
    let mut first = true;
    for p in body.iter().skip(1) {
        if first && anchored {
            pl.extrude_stationary(anchor_len, opts.feed);
        }
        first = false;
        pl.extrude_to(*p, opts.feed, 1.0);
    }
    for p in coast.iter().skip(1) {
        pl.glide_to(*p, opts.feed);
    }

    if !opts.shell_finish {
        return;
    }

    // Moving retract: keep following the loop while pulling back.
    if cfg.s.moving_retract && cfg.s.retract_len > 0.0 {
        let speed_ratio = cfg.s.retract_speed / opts.feed;
        let retract_dist = cfg.s.retract_len / speed_ratio;
        let mut remaining = retract_dist;
        let mut pulled = 0.0;
        let mut idx = 0;
        while remaining > 0.0 && idx + 1 < pts.len() {
            let seg_len = distance(pts[idx], pts[idx + 1]);
            let step = seg_len.min(remaining);
            if step > 0.0 {
                let t = step / seg_len;
                let target = lerp(pts[idx], pts[idx + 1], t);
                let e = -cfg.s.retract_len * step / retract_dist;
                pulled += -e;
                pl.push_move(crate::GMove {
                    x: target.x,
                    y: target.y,
                    z: pl.machine.z,
                    e,
                    feed: opts.feed,
                    scalable: false,
                    is_travel: false,
                    is_restart: false,
                });
            }
            remaining -= step;
            idx += 1;
        }
        if pulled < cfg.s.retract_len - 1e-12 {
            // Path ran out; finish the pull in place.
            pl.push_move(crate::GMove {
                x: pl.machine.x,
                y: pl.machine.y,
                z: pl.machine.z,
                e: -(cfg.s.retract_len - pulled),
                feed: cfg.s.retract_speed,
                scalable: false,
                is_travel: false,
                is_restart: false,
            });
        }
        pl.mark_retracted();
    } else if cfg.s.wipe_len > 0.0 {
        pl.retract();
    }

    // Wipe: drag the idle nozzle along the loop to shed the last residue.
    if cfg.s.wipe_len > 0.0 {
        let mut remaining = cfg.s.wipe_len;
        let mut idx = 0;
        let from = pl.position();
        // Continue from wherever the retract left the head.
        let (mut idx_start, _) = pts
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| OrderedFloat(square_distance(**p, from)))
            .expect("closed path has points");
        if idx_start + 1 >= pts.len() {
            idx_start = 0;
        }
        idx += idx_start;
        while remaining > 0.0 && idx + 1 < pts.len() {
            let seg_len = distance(pts[idx], pts[idx + 1]);
            let step = seg_len.min(remaining);
            if seg_len > 0.0 && step > 0.0 {
                let target = lerp(pts[idx], pts[idx + 1], step / seg_len);
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
            remaining -= step;
            idx += 1;
        }
        pl.machine.force_retract = true;
    }
}

/// One shell loop awaiting emission.
struct ShellCandidate<'l> {
    level: usize,
    ring: &'l LineString<f64>,
}

/// Emit every shell of an island, interleaved for minimum travel or in
/// strict level order.
pub fn plan_island_shells(pl: &mut Planner, island: &Island, layer0: bool) {
    let cfg = pl.cfg;
    let outside_first = cfg.s.outside_first || layer0;
    let levels = island.insets.len();

    let mut remaining: Vec<ShellCandidate> = Vec::new();
    for (level, inset) in island.insets.iter().enumerate() {
        for ring in strata_geom::clip::rings(inset) {
            if ring_len(ring) >= 3 {
                remaining.push(ShellCandidate { level, ring });
            }
        }
    }

    let aligned = |level: usize| {
        cfg.s.align_seams && (level == 0 || cfg.s.align_interior_seams)
    };

    while !remaining.is_empty() {
        let from = pl.position();
        let pick = if cfg.s.strict_shell_order {
            // Finish each level before starting the next.
            let target_level = remaining
                .iter()
                .map(|c| c.level)
                .fold(
                    if outside_first { usize::MAX } else { 0 },
                    |acc, l| if outside_first { acc.min(l) } else { acc.max(l) },
                );
            remaining
                .iter()
                .enumerate()
                .filter(|(_, c)| c.level == target_level)
                .min_by_key(|(_, c)| OrderedFloat(candidate_distance(c, from, aligned(c.level))))
                .map(|(i, _)| i)
        } else {
            remaining
                .iter()
                .enumerate()
                .min_by_key(|(_, c)| {
                    let d = candidate_distance(c, from, aligned(c.level)).sqrt();
                    let factor = if outside_first {
                        c.level + 2
                    } else {
                        levels - c.level + 1
                    };
                    OrderedFloat(d * factor as f64 + c.level as f64 * 1e-9)
                })
                .map(|(i, _)| i)
        }
        .expect("remaining is non-empty");

        let cand = remaining.swap_remove(pick);
        let start = if aligned(cand.level) {
            0
        } else {
            nearest_vertex(cand.ring, pl.position()).0
        };
        emit_closed_path(
            pl,
            cand.ring,
            start,
            ClosedPathOptions {
                feed: shell_feed(cfg, cand.level),
                shell_finish: true,
            },
        );
    }
}

fn candidate_distance(c: &ShellCandidate, from: Point, aligned: bool) -> f64 {
    if aligned {
        square_distance(c.ring.0[0], from)
    } else {
        nearest_vertex(c.ring, from).1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::Planner;
    use crate::GMove;
    use geo::{line_string, MultiPolygon};
    use strata_core::{Config, Settings};
    use strata_geom::point;

    fn square_ring(size: f64) -> LineString<f64> {
        line_string![
            (x: 0.0, y: 0.0),
            (x: size, y: 0.0),
            (x: size, y: size),
            (x: 0.0, y: size),
            (x: 0.0, y: 0.0),
        ]
    }

    /// Emit one 10mm square loop starting at the origin corner.
    fn emit(tune: impl FnOnce(&mut Settings)) -> Vec<GMove> {
        let mut settings = Settings::default();
        tune(&mut settings);
        let cfg = Config::new(settings).unwrap();
        let mut pl = Planner::new(&cfg, 0.2, MultiPolygon::new(vec![]));
        emit_closed_path(
            &mut pl,
            &square_ring(10.0),
            0,
            ClosedPathOptions {
                feed: 25.0,
                shell_finish: true,
            },
        );
        pl.into_plan(0).moves
    }

    fn length_where(moves: &[GMove], pred: impl Fn(&GMove) -> bool) -> f64 {
        let mut prev = point(0.0, 0.0);
        let mut len = 0.0;
        for mv in moves {
            let p = point(mv.x, mv.y);
            if pred(mv) {
                len += distance(prev, p);
            }
            prev = p;
        }
        len
    }

    #[test]
    fn shell_clip_trims_the_tail_of_the_loop() {
        let moves = emit(|_| {});
        let extruded = length_where(&moves, |m| m.e > 0.0);
        // Perimeter 40 minus shell_clip * extrusion_width.
        let clip = 0.15 * 0.45;
        assert!((40.0 - extruded - clip).abs() < 1e-9, "extruded {}", extruded);
    }

    #[test]
    fn coasting_rides_the_last_millimeter_without_material() {
        let moves = emit(|s| s.coast_len = 1.0);
        let coasted = length_where(&moves, |m| m.e == 0.0 && !m.is_travel);
        assert!((coasted - 1.0).abs() < 1e-9, "coasted {}", coasted);
        // Coast comes after the last extrusion.
        let last_extrude = moves.iter().rposition(|m| m.e > 0.0).unwrap();
        let first_coast = moves
            .iter()
            .position(|m| m.e == 0.0 && !m.is_travel)
            .unwrap();
        assert!(first_coast > last_extrude);
    }

    #[test]
    fn anchor_deposits_a_stationary_dot_at_the_seam() {
        let moves = emit(|s| s.anchor = true);
        let mut prev = point(0.0, 0.0);
        let mut found = false;
        for mv in &moves {
            let p = point(mv.x, mv.y);
            if mv.e > 0.0 && !mv.is_restart && distance(prev, p) < 1e-12 {
                found = true;
                let expected = 0.45 / 2.0 * std::f64::consts::FRAC_PI_4;
                // The dot carries the anchor worth of track.
                let cfg = Config::new(Settings::default()).unwrap();
                assert!((mv.e - cfg.extrusion_len(expected, 1.0)).abs() < 1e-12);
            }
            prev = p;
        }
        assert!(found, "no stationary anchor dot emitted");
    }

    #[test]
    fn moving_retract_pulls_the_full_length_along_the_path() {
        let moves = emit(|s| s.moving_retract = true);
        let pulled: f64 = moves.iter().filter(|m| m.e < 0.0).map(|m| m.e).sum();
        assert!((pulled + 1.0).abs() < 1e-9, "pulled {}", pulled);
        // The pull happens while moving along the loop. The first pull
        // segment bridges the small clip gap, so allow a little slack.
        let moving = length_where(&moves, |m| m.e < 0.0);
        let expected_dist = 1.0 * 25.0 / 20.0;
        assert!((moving - expected_dist).abs() < 0.01, "moved {}", moving);
    }

    #[test]
    fn wipe_travels_along_the_loop_after_a_retract() {
        let moves = emit(|s| s.wipe_len = 2.0);
        let retract = moves.iter().position(|m| m.e < 0.0).expect("wipe retracts first");
        let wiped = length_where(&moves, |m| m.is_travel && m.e == 0.0);
        assert!((wiped - 2.0).abs() < 0.01, "wiped {}", wiped);
        let first_wipe = moves.iter().position(|m| m.is_travel).unwrap();
        assert!(first_wipe > retract);
    }

    #[test]
    fn plain_loops_skip_the_shell_finish() {
        let mut settings = Settings::default();
        settings.coast_len = 1.0;
        settings.wipe_len = 2.0;
        let cfg = Config::new(settings).unwrap();
        let mut pl = Planner::new(&cfg, 0.2, MultiPolygon::new(vec![]));
        emit_closed_path(
            &mut pl,
            &square_ring(10.0),
            0,
            ClosedPathOptions {
                feed: 25.0,
                shell_finish: false,
            },
        );
        let moves = pl.into_plan(0).moves;
        let extruded = length_where(&moves, |m| m.e > 0.0);
        assert!((extruded - 40.0).abs() < 1e-9);
        assert!(moves.iter().all(|m| !m.is_travel && m.e >= 0.0));
    }
}
