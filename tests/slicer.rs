//! End-to-end scenarios: synthetic meshes through the whole pipeline.

use strata::core::mesh::shapes::cuboid;
use strata::core::{Config, Settings};
use strata::pipeline::{plan_object, slice_object};
use strata::plan::comb::ring_crossings;
use strata::plan::gcode::write_gcode;
use strata::plan::LayerPlan;

fn cfg_with(f: impl FnOnce(&mut Settings)) -> Config {
    let mut s = Settings::default();
    f(&mut s);
    Config::new(s).unwrap()
}

fn plan_cube(size: [f64; 3], cfg: &Config) -> Vec<LayerPlan> {
    let object = slice_object(cuboid([0.0, 0.0, 0.0], size), cfg);
    plan_object(&object, cfg)
}

#[test]
fn unit_cube_plans_fifty_layers_of_extrusion() {
    let cfg = cfg_with(|_| {});
    let plans = plan_cube([10.0, 10.0, 10.0], &cfg);
    assert_eq!(plans.len(), 50);
    for (i, plan) in plans.iter().enumerate() {
        assert!(
            plan.moves.iter().any(|m| m.e > 0.0),
            "layer {} extrudes nothing",
            i
        );
        // Layer z = (i + 1) * layer_height for every printing move.
        let z = (i as f64 + 1.0) * 0.2;
        for mv in &plan.moves {
            assert!((mv.z - z).abs() < 1e-9, "layer {} move at z {}", i, mv.z);
        }
        assert!(plan.layer_time > 0.0);
    }
}

#[test]
fn every_move_extrudes_travels_or_is_a_flagged_retract() {
    let cfg = cfg_with(|_| {});
    let plans = plan_cube([10.0, 10.0, 10.0], &cfg);
    for plan in &plans {
        for mv in &plan.moves {
            if mv.e < 0.0 {
                // A retract: never a travel, never scalable.
                assert!(!mv.is_travel);
                assert!(!mv.scalable);
            } else if mv.is_travel {
                assert_eq!(mv.e, 0.0);
            }
        }
    }
}

#[test]
fn unretracted_travels_never_pass_through_island_boundaries() {
    let cfg = cfg_with(|_| {});
    let object = slice_object(cuboid([0.0, 0.0, 0.0], [10.0, 10.0, 10.0]), &cfg);
    let plans = plan_object(&object, &cfg);
    for plan in &plans {
        let slice = &object.slices[plan.index];
        let mut retracted = false;
        let mut prev = strata::geom::point(0.0, 0.0);
        for mv in &plan.moves {
            let p = strata::geom::point(mv.x, mv.y);
            if mv.e < 0.0 {
                retracted = true;
            } else if mv.e > 0.0 {
                retracted = false;
            }
            if mv.is_travel && !retracted {
                for island in &slice.islands {
                    for ring in strata::geom::clip::rings(&island.boundaries) {
                        assert!(
                            ring_crossings(prev, p, ring) < 2,
                            "layer {}: unretracted travel {:?} -> {:?} passes through a boundary",
                            plan.index,
                            prev,
                            p
                        );
                    }
                }
            }
            prev = p;
        }
    }
}

#[test]
fn two_cubes_retract_between_islands() {
    let mut mesh = cuboid([0.0, 0.0, 0.0], [5.0, 5.0, 4.0]);
    mesh.triangles
        .extend(cuboid([15.0, 0.0, 0.0], [5.0, 5.0, 4.0]).triangles);
    let cfg = cfg_with(|_| {});
    let object = slice_object(mesh, &cfg);
    assert!(object.slices.iter().all(|s| s.islands.len() == 2));
    let plans = plan_object(&object, &cfg);
    for plan in &plans {
        // At least one retract per layer: leaving the first island.
        let retracts = plan.moves.iter().filter(|m| m.e < 0.0).count();
        assert!(retracts >= 1, "layer {} has no retract", plan.index);
    }
}

#[test]
fn brim_prints_before_and_outside_the_object() {
    let cfg = cfg_with(|s| {
        s.brim_width = 5.0;
        s.extrusion_width = 0.5;
    });
    let object = slice_object(cuboid([0.0, 0.0, 0.0], [10.0, 10.0, 4.0]), &cfg);
    assert_eq!(object.brim.rings.len(), 10);
    let plans = plan_object(&object, &cfg);
    let first_extrusion = plans[0]
        .moves
        .iter()
        .find(|m| m.e > 0.0)
        .expect("layer 0 extrudes");
    // The first thing printed is brim, outside the 10x10 footprint.
    let outside = first_extrusion.x < 0.0
        || first_extrusion.y < 0.0
        || first_extrusion.x > 10.0
        || first_extrusion.y > 10.0;
    assert!(
        outside,
        "first extrusion at ({}, {}) is not brim",
        first_extrusion.x, first_extrusion.y
    );
}

#[test]
fn quick_layers_are_slowed_to_the_minimum_layer_time() {
    let cfg = cfg_with(|_| {});
    let plans = plan_cube([3.0, 3.0, 2.0], &cfg);
    // A 3mm square layer takes well under min_layer_time at full speed, so
    // cooling pins every scalable move at (or near) the floor.
    for plan in plans.iter().skip(cfg.s.layer_time_samples) {
        for mv in plan.moves.iter().filter(|m| m.scalable && m.feed > 0.0) {
            assert!(
                mv.feed <= cfg.s.feed_rate + 1e-9,
                "layer {} scalable move at {} mm/s",
                plan.index,
                mv.feed
            );
            assert!(mv.feed >= cfg.s.min_feed_rate - 1e-9);
        }
    }
}

#[test]
fn gcode_output_is_complete_and_accounted() {
    let cfg = cfg_with(|s| {
        s.start_gcode = "G28".to_string();
        s.end_gcode = "M84".to_string();
    });
    let plans = plan_cube([10.0, 10.0, 2.0], &cfg);
    let mut out = Vec::new();
    let totals = write_gcode(&mut out, &cfg, &plans).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.starts_with("G28"));
    assert!(text.contains("M84"));
    assert_eq!(text.matches("G92 E0").count(), plans.len());
    assert!(text.contains("; material length"));
    assert!(totals.material_len > 0.0);
    assert!(totals.material_mass > 0.0);
    assert!(totals.print_time > 0.0);

    // The emitted extruder total of each layer matches the plan's sum of
    // positive deltas to within floating point noise.
    let planned: f64 = plans
        .iter()
        .flat_map(|p| p.moves.iter())
        .filter(|m| m.e > 0.0)
        .map(|m| m.e)
        .sum();
    assert!((planned - totals.material_len).abs() < 1e-6);
}

#[test]
fn full_cube_gcode_extrusion_matches_geometry() {
    // Loose cross-check of the extrusion formula: a 100% solid small cube
    // should consume at least the volume of its tracks.
    let cfg = cfg_with(|s| s.infill_density = 1.0);
    let plans = plan_cube([5.0, 5.0, 1.0], &cfg);
    let e_total: f64 = plans
        .iter()
        .flat_map(|p| p.moves.iter())
        .filter(|m| m.e > 0.0)
        .map(|m| m.e)
        .sum();
    // Volume in filament-length terms: cube volume / filament area, give or
    // take packing, overlaps and the shell clip.
    let expected = 5.0 * 5.0 * 1.0 / cfg.d.material_area;
    assert!(
        e_total > expected * 0.4 && e_total < expected * 1.6,
        "e_total {} expected around {}",
        e_total,
        expected
    );
}
