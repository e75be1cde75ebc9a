//! The staged batch pipeline.
//!
//! Every stage is parallel over its natural unit (triangles, then slices)
//! with a full barrier between stages; collection into layer-indexed
//! vectors provides the ordered merge that G-code emission requires.

use log::{debug, info, warn};
use rayon::prelude::*;

use strata_core::brim::{build_brim_raft, BrimRaft};
use strata_core::infill::build_infill;
use strata_core::insets::build_insets;
use strata_core::island::build_islands;
use strata_core::patterns::Patterns;
use strata_core::segment::{extract_segments, layer_count};
use strata_core::stitch::stitch_segments;
use strata_core::support::build_support;
use strata_core::{Config, Mesh, Slice};
use strata_plan::speed::scale_for_cooling;
use strata_plan::{plan_layer, LayerPlan};

/// A fully sliced object, ready for motion planning.
pub struct SlicedObject {
    pub slices: Vec<Slice>,
    pub patterns: Patterns,
    pub brim: BrimRaft,
}

/// Run S1..S7: mesh to per-layer geometry. Consumes the mesh; triangles
/// are dropped as soon as the segments exist.
pub fn slice_object(mut mesh: Mesh, cfg: &Config) -> SlicedObject {
    mesh.place(cfg.s.x_translate, cfg.s.y_translate, cfg.s.z_chop);
    let layers = layer_count(mesh.max_z(), cfg.s.layer_height);
    info!("slicing {} triangles into {} layers", mesh.triangles.len(), layers);

    let per_slice = extract_segments(&mesh, cfg, layers);
    drop(mesh);

    // S2 + S3 per slice.
    let mut slices: Vec<Slice> = per_slice
        .into_par_iter()
        .enumerate()
        .map(|(i, segments)| {
            let (rings, stats) = stitch_segments(
                segments,
                cfg.s.tolerance,
                cfg.s.scale_constant,
                cfg.s.coarseness,
                i,
            );
            let mut islands = build_islands(rings, cfg, i);
            for island in &mut islands {
                build_insets(island, cfg);
            }
            Slice {
                islands,
                stitch: stats,
                ..Slice::default()
            }
        })
        .collect();

    let holes: usize = slices.iter().map(|s| s.stitch.holes).sum();
    if holes > 0 {
        warn!("{} open outlines discarded across all layers", holes);
    }

    // S4: global patterns over the object bounds.
    let bounds = slices
        .iter()
        .filter_map(|s| s.bounds_mm(cfg.s.scale_constant))
        .reduce(|a, b| (a.0.min(b.0), a.1.min(b.1), a.2.max(b.2), a.3.max(b.3)))
        .unwrap_or((0.0, 0.0, 0.0, 0.0));
    let patterns = Patterns::generate(cfg, bounds);

    // S5..S7.
    build_infill(&mut slices, cfg);
    build_support(&mut slices, cfg, &patterns);
    let brim = build_brim_raft(&slices, cfg, &patterns);

    debug!(
        "sliced: {} layers, {} islands",
        slices.len(),
        slices.iter().map(|s| s.islands.len()).sum::<usize>()
    );

    SlicedObject {
        slices,
        patterns,
        brim,
    }
}

/// Run S8 + the cooling scale: per-layer motion plans in layer order.
pub fn plan_object(object: &SlicedObject, cfg: &Config) -> Vec<LayerPlan> {
    let mut plans: Vec<LayerPlan> = (0..object.slices.len())
        .into_par_iter()
        .map(|i| plan_layer(cfg, &object.slices, i, &object.brim))
        .collect();
    scale_for_cooling(&mut plans, cfg);
    plans
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::mesh::shapes::cuboid;
    use strata_core::Settings;

    #[test]
    fn cube_slices_into_fifty_single_island_layers() {
        let cfg = Config::new(Settings::default()).unwrap();
        let object = slice_object(cuboid([0.0, 0.0, 0.0], [10.0, 10.0, 10.0]), &cfg);
        assert_eq!(object.slices.len(), 50);
        for slice in &object.slices {
            assert_eq!(slice.islands.len(), 1);
            assert_eq!(slice.islands[0].insets.len(), 2);
        }
    }

    #[test]
    fn two_cubes_give_two_islands_per_layer() {
        let mut mesh = cuboid([0.0, 0.0, 0.0], [5.0, 5.0, 4.0]);
        mesh.triangles
            .extend(cuboid([10.0, 0.0, 0.0], [5.0, 5.0, 4.0]).triangles);
        let cfg = Config::new(Settings::default()).unwrap();
        let object = slice_object(mesh, &cfg);
        assert_eq!(object.slices.len(), 20);
        for slice in &object.slices {
            assert_eq!(slice.islands.len(), 2);
        }
    }
}
