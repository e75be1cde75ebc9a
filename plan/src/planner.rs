//! Per-layer motion planning: the planner state machine and the layer
//! entry point.

use geo::{MultiPolygon, Polygon};
use itertools::Itertools;
use ordered_float::OrderedFloat;
use strata_core::brim::BrimRaft;
use strata_core::island::Island;
use strata_core::{Config, Slice};
use strata_geom::clip::rings;
use strata_geom::line::distance;
use strata_geom::polygon::nearest_vertex;
use strata_geom::{point, Point};

use crate::comb::{comb_route, crosses_region};
use crate::sched;
use crate::shells;
use crate::{GMove, LayerPlan, Machine};

/// Which retract threshold a travel move is judged against.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TravelKind {
    Infill,
    Other,
}

pub struct Planner<'a> {
    pub cfg: &'a Config,
    pub machine: Machine,
    moves: Vec<GMove>,
    layer_time: f64,
    /// Boundaries of the island the head is currently in (or just left).
    last_boundaries: Option<MultiPolygon<f64>>,
    last_comb_paths: Option<MultiPolygon<f64>>,
    /// Outer boundaries of islands already printed on this layer.
    printed_outer_boundaries: MultiPolygon<f64>,
    printed_outer_comb_paths: MultiPolygon<f64>,
    /// Exposed top surfaces of the layer below; crossing them retracts.
    exposed_below: MultiPolygon<f64>,
}

impl<'a> Planner<'a> {
    pub fn new(cfg: &'a Config, z: f64, exposed_below: MultiPolygon<f64>) -> Planner<'a> {
        Planner {
            cfg,
            machine: Machine::at_layer_start(z),
            moves: Vec::new(),
            layer_time: 0.0,
            last_boundaries: None,
            last_comb_paths: None,
            printed_outer_boundaries: MultiPolygon::new(vec![]),
            printed_outer_comb_paths: MultiPolygon::new(vec![]),
            exposed_below,
        }
    }

    pub fn position(&self) -> Point {
        point(self.machine.x, self.machine.y)
    }

    pub fn set_z(&mut self, z: f64) {
        self.machine.z = z;
    }

    pub(crate) fn push_move(&mut self, mv: GMove) {
        let len = distance(self.position(), point(mv.x, mv.y));
        if mv.feed > 0.0 {
            self.layer_time += len / mv.feed;
        }
        self.machine.x = mv.x;
        self.machine.y = mv.y;
        self.machine.z = mv.z;
        self.machine.e += mv.e;
        self.machine.feed = mv.feed;
        self.moves.push(mv);
    }

    fn move_at(&self, p: Point, e: f64, feed: f64, scalable: bool, is_travel: bool, is_restart: bool) -> GMove {
        GMove {
            x: p.x,
            y: p.y,
            z: self.machine.z,
            e,
            feed,
            scalable,
            is_travel,
            is_restart,
        }
    }

    /// Pull filament back, once.
    pub fn retract(&mut self) {
        if self.machine.is_retracted || self.cfg.s.retract_len <= 0.0 {
            self.machine.is_retracted = true;
            return;
        }
        let mv = self.move_at(
            self.position(),
            -self.cfg.s.retract_len,
            self.cfg.s.retract_speed,
            false,
            false,
            false,
        );
        self.push_move(mv);
        self.machine.is_retracted = true;
    }

    /// Mark the filament retracted without emitting a move (the shell
    /// emitter already pulled it back along the path).
    pub(crate) fn mark_retracted(&mut self) {
        self.machine.is_retracted = true;
    }

    fn unretract(&mut self) {
        if !self.machine.is_retracted {
            return;
        }
        self.machine.is_retracted = false;
        if self.cfg.s.retract_len <= 0.0 {
            return;
        }
        let feed = if self.cfg.s.restart_speed > 0.0 {
            self.cfg.s.restart_speed
        } else {
            self.cfg.s.retract_speed
        };
        let mv = self.move_at(self.position(), self.cfg.s.retract_len, feed, false, false, true);
        self.push_move(mv);
    }

    /// Extrude a straight track to `p`.
    pub fn extrude_to(&mut self, p: Point, feed: f64, flow_adjust: f64) {
        let len = distance(self.position(), p);
        self.extrude_len_to(p, feed, len * flow_adjust);
    }

    /// Extrude to `p` depositing material worth `material_len` millimeters
    /// of standard-width track, regardless of the travel distance.
    pub fn extrude_len_to(&mut self, p: Point, feed: f64, material_len: f64) {
        self.unretract();
        let e = self.cfg.extrusion_len(material_len, 1.0);
        let mv = self.move_at(p, e, feed, true, false, false);
        self.push_move(mv);
    }

    /// Stationary extrusion (the anchor dot).
    pub fn extrude_stationary(&mut self, material_len: f64, feed: f64) {
        self.extrude_len_to(self.position(), feed, material_len);
    }

    /// Move without extruding and without travel semantics (coasting).
    pub fn glide_to(&mut self, p: Point, feed: f64) {
        let mv = self.move_at(p, 0.0, feed, true, false, false);
        self.push_move(mv);
    }

    fn raw_travel(&mut self, p: Point) {
        let mv = self.move_at(p, 0.0, self.cfg.s.travel_feed_rate, false, true, false);
        self.push_move(mv);
    }

    /// A travel move: decide combing and retraction, then go.
    pub fn travel_to(&mut self, p: Point, kind: TravelKind) {
        let p0 = self.position();
        if distance(p0, p) < 1e-9 {
            return;
        }
        let threshold = match kind {
            TravelKind::Infill => self.cfg.s.retract_threshold,
            TravelKind::Other => self.cfg.s.retract_min_travel,
        };

        let mut via: Vec<Point> = Vec::new();
        let mut travel_len = distance(p0, p);
        let mut force = self.machine.force_retract;
        let mut crossing = false;
        let mut within_island = false;

        let inside = self
            .last_boundaries
            .as_ref()
            .map(|b| self.cfg.ctx().contains(b, p))
            .unwrap_or(false);

        if self.cfg.s.comb {
            if let (Some(bounds), Some(paths), true) =
                (self.last_boundaries.clone(), self.last_comb_paths.clone(), inside)
            {
                // Within the island: ride the island's own paths.
                let route = comb_route(p0, p, &bounds, &paths);
                force |= route.forced_retract;
                via = route.via;
                travel_len = route.length;
                within_island = true;
            } else if let (Some(bounds), Some(paths)) =
                (self.last_boundaries.take(), self.last_comb_paths.take())
            {
                // Leaving the island: head for the exit nearest the
                // destination, then cross printed territory.
                let exit = nearest_point_on_region(&paths, p);
                let inner = comb_route(p0, exit, &bounds, &paths);
                force |= inner.forced_retract;
                via = inner.via;
                via.push(exit);
                let outer = comb_route(
                    exit,
                    p,
                    &self.printed_outer_boundaries,
                    &self.printed_outer_comb_paths,
                );
                force |= outer.forced_retract;
                travel_len = inner.length + outer.length;
                via.extend(outer.via);
                crossing = true;
            } else {
                // Between islands.
                let route = comb_route(
                    p0,
                    p,
                    &self.printed_outer_boundaries,
                    &self.printed_outer_comb_paths,
                );
                force |= route.forced_retract;
                via = route.via;
                travel_len = route.length;
            }
        } else if let Some(bounds) = &self.last_boundaries {
            if !inside {
                crossing = true;
                self.last_boundaries = None;
                self.last_comb_paths = None;
            } else if crosses_region(p0, p, bounds) {
                crossing = true;
            }
        }

        // Travel over a freshly exposed surface scars it; retract first.
        if travel_len > self.cfg.s.retract_min_travel
            && crosses_region(p0, p, &self.exposed_below)
        {
            crossing = true;
        }

        let over_threshold = travel_len > threshold
            && (self.cfg.s.retract_within_island || !within_island || !self.cfg.s.comb);
        if force || over_threshold || crossing {
            self.retract();
        }
        self.machine.force_retract = false;

        for q in via {
            self.raw_travel(q);
        }
        self.raw_travel(p);
    }

    /// Enter an island: its boundaries drive travel decisions until exit.
    pub fn enter_island(&mut self, island: &Island) {
        self.last_boundaries = Some(island.boundaries.clone());
        self.last_comb_paths = Some(island.comb_paths.clone());
    }

    /// Record a finished island's outer paths for later combing.
    pub fn finish_island(&mut self, island: &Island) {
        self.printed_outer_boundaries
            .0
            .extend(island.outer_boundaries.0.iter().cloned());
        self.printed_outer_comb_paths
            .0
            .extend(island.outer_comb_paths.0.iter().cloned());
    }

    pub fn into_plan(self, index: usize) -> LayerPlan {
        LayerPlan {
            index,
            moves: self.moves,
            layer_time: self.layer_time,
        }
    }
}

/// Nearest point to `p` on any ring vertex of a region.
fn nearest_point_on_region(region: &MultiPolygon<f64>, p: Point) -> Point {
    let mut best = p;
    let mut best_d = f64::MAX;
    for ring in rings(region) {
        let (i, d) = nearest_vertex(ring, p);
        if d < best_d {
            best_d = d;
            best = ring.0[i];
        }
    }
    best
}

/// Candidate approach point of an island: the aligned seam start when seams
/// are aligned, otherwise the nearest outline vertex.
fn island_approach(island: &Island, from: Point, align_seams: bool) -> (Point, f64) {
    let mut best = (from, f64::MAX);
    for ring in rings(&island.insets[0]) {
        if align_seams {
            let start = ring.0[0];
            let d = strata_geom::line::square_distance(start, from);
            if d < best.1 {
                best = (start, d);
            }
        } else {
            let (i, d) = nearest_vertex(ring, from);
            if d < best.1 {
                best = (ring.0[i], d);
            }
        }
    }
    best
}

/// Plan one layer: brim and raft on layer 0, then support, then islands
/// nearest-first.
pub fn plan_layer(
    cfg: &Config,
    slices: &[Slice],
    index: usize,
    brim: &BrimRaft,
) -> LayerPlan {
    let slice = &slices[index];
    let exposed_below = if index > 0 {
        MultiPolygon::new(
            slices[index - 1]
                .islands
                .iter()
                .flat_map(|isl| isl.exposed_surface.0.iter().cloned())
                .collect::<Vec<Polygon<f64>>>(),
        )
    } else {
        MultiPolygon::new(vec![])
    };

    let mut pl = Planner::new(cfg, cfg.layer_z(index), exposed_below);

    if index == 0 {
        if cfg.s.raft {
            sched::plan_raft(&mut pl, brim);
            pl.set_z(cfg.layer_z(0));
        }
        if !brim.rings.is_empty() {
            sched::plan_brim(&mut pl, brim);
        }
    }

    if cfg.s.generate_support {
        sched::plan_support_layer(&mut pl, slice);
    }

    let mut remaining: Vec<&Island> = slice.islands.iter().collect();
    while !remaining.is_empty() {
        let from = pl.position();
        let pick = remaining
            .iter()
            .position_min_by_key(|isl| {
                OrderedFloat(island_approach(isl, from, cfg.s.align_seams).1)
            })
            .expect("remaining is non-empty");
        let island = remaining.swap_remove(pick);

        // Approach while the previous island is still the travel context,
        // so leaving it combs out and forces the cross-island retract.
        let (approach, _) = island_approach(island, pl.position(), cfg.s.align_seams);
        pl.travel_to(approach, TravelKind::Other);
        pl.enter_island(island);
        shells::plan_island_shells(&mut pl, island, index == 0);
        sched::plan_island_fill(&mut pl, island, index);
        pl.finish_island(island);
    }

    // End of layer: whatever travel comes next must retract.
    pl.machine.force_retract = true;
    pl.into_plan(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use strata_core::Settings;
    use strata_geom::point;

    fn planner(cfg: &Config, exposed: MultiPolygon<f64>) -> Planner {
        let mut pl = Planner::new(cfg, 0.2, exposed);
        pl.machine.force_retract = false;
        pl
    }

    fn cfg() -> Config {
        Config::new(Settings::default()).unwrap()
    }

    #[test]
    fn long_travel_retracts_and_restarts() {
        let cfg = cfg();
        let mut pl = planner(&cfg, MultiPolygon::new(vec![]));
        pl.travel_to(point(100.0, 0.0), TravelKind::Other);
        pl.extrude_to(point(101.0, 0.0), 25.0, 1.0);
        let moves = pl.into_plan(0).moves;
        assert!(moves[0].e < 0.0 && !moves[0].is_travel && !moves[0].scalable);
        assert!(moves[1].is_travel);
        assert!(moves[2].is_restart && moves[2].e > 0.0);
        assert!(moves[3].e > 0.0);
    }

    #[test]
    fn short_travel_keeps_the_pressure() {
        let cfg = cfg();
        let mut pl = planner(&cfg, MultiPolygon::new(vec![]));
        pl.travel_to(point(1.0, 0.0), TravelKind::Other);
        let moves = pl.into_plan(0).moves;
        assert_eq!(moves.len(), 1);
        assert!(moves[0].is_travel && moves[0].e == 0.0);
    }

    #[test]
    fn infill_travels_use_the_larger_threshold() {
        let cfg = cfg();
        let mut pl = planner(&cfg, MultiPolygon::new(vec![]));
        // 10mm is far over retract_min_travel but under retract_threshold.
        pl.travel_to(point(10.0, 0.0), TravelKind::Infill);
        let moves = pl.into_plan(0).moves;
        assert!(moves.iter().all(|m| m.e == 0.0), "infill hop retracted");
    }

    #[test]
    fn crossing_an_exposed_surface_retracts() {
        let cfg = cfg();
        let exposed = MultiPolygon::new(vec![polygon![
            (x: 4.0, y: -1.0),
            (x: 6.0, y: -1.0),
            (x: 6.0, y: 1.0),
            (x: 4.0, y: 1.0),
        ]]);
        let mut pl = planner(&cfg, exposed);
        pl.travel_to(point(10.0, 0.0), TravelKind::Infill);
        let moves = pl.into_plan(0).moves;
        assert!(moves[0].e < 0.0, "travel over a fresh top surface must retract");
    }

    #[test]
    fn forced_retract_applies_to_any_travel() {
        let cfg = cfg();
        let mut pl = planner(&cfg, MultiPolygon::new(vec![]));
        pl.machine.force_retract = true;
        pl.travel_to(point(0.5, 0.0), TravelKind::Other);
        let moves = pl.into_plan(0).moves;
        assert!(moves[0].e < 0.0);
    }
}
