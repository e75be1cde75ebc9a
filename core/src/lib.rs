//! The strata slicing pipeline: triangle mesh in, per-layer geometry out.
//!
//! Stages, leaves first:
//!
//! 1. [`segment`] — plane-triangle intersection (per triangle, parallel).
//! 2. [`stitch`] + [`island`] — segments to oriented island polygon trees.
//! 3. [`insets`] — shells, gap strips, derived boundary paths.
//! 4. [`patterns`] — global fill line sets.
//! 5. [`infill`] — solid/sparse regions and fill lines (reads neighbours).
//! 6. [`support`] — overhang detection and support maps.
//! 7. [`brim`] — brim rings and raft.
//!
//! Motion planning and G-code emission live in `strata_plan`; the stage
//! driver that runs everything in order lives in the `strata` umbrella
//! crate.

pub mod brim;
pub mod config;
pub mod infill;
pub mod island;
pub mod insets;
pub mod mesh;
pub mod patterns;
pub mod segment;
pub mod stitch;
pub mod support;

pub use config::{Config, ConfigError, Settings};
pub use island::Island;
pub use mesh::{Mesh, MeshError};

use support::SupportLayer;

/// Per-layer container. Raw segments live only between S1 and S2; islands
/// and support live until the layer's G-code has been emitted.
#[derive(Clone, Debug, Default)]
pub struct Slice {
    pub islands: Vec<Island>,
    pub support: SupportLayer,
    /// Stitching statistics, kept for end-of-run reporting.
    pub stitch: stitch::StitchStats,
}

impl Slice {
    /// Bounds of everything printed on this layer, in millimeters.
    pub fn bounds_mm(&self, scale: f64) -> Option<(f64, f64, f64, f64)> {
        let mut acc: Option<(f64, f64, f64, f64)> = None;
        for island in &self.islands {
            let (x0, y0, x1, y1) = island.bbox.to_mm(scale);
            acc = Some(match acc {
                None => (x0, y0, x1, y1),
                Some((ax0, ay0, ax1, ay1)) => {
                    (ax0.min(x0), ay0.min(y0), ax1.max(x1), ay1.max(y1))
                }
            });
        }
        acc
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Shared fixture: run S1-S3 over a synthetic mesh.

    use rayon::prelude::*;

    use crate::config::{Config, Settings};
    use crate::insets::build_insets;
    use crate::island::build_islands;
    use crate::mesh::Mesh;
    use crate::segment::{extract_segments, layer_count};
    use crate::stitch::stitch_segments;
    use crate::Slice;

    pub fn slice_mesh(mut mesh: Mesh, settings: Settings) -> (Vec<Slice>, Config) {
        let cfg = Config::new(settings).unwrap();
        mesh.place(0.0, 0.0, 0.0);
        let layers = layer_count(mesh.max_z(), cfg.s.layer_height);
        let per_slice = extract_segments(&mesh, &cfg, layers);
        let slices: Vec<Slice> = per_slice
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
                let mut islands = build_islands(rings, &cfg, i);
                for island in &mut islands {
                    build_insets(island, &cfg);
                }
                Slice {
                    islands,
                    stitch: stats,
                    ..Slice::default()
                }
            })
            .collect();
        (slices, cfg)
    }

    pub fn sliced_cuboid(size: [f64; 3], settings: Settings) -> (Vec<Slice>, Config) {
        let mesh = crate::mesh::shapes::cuboid([0.0, 0.0, 0.0], size);
        let (mut slices, cfg) = slice_mesh(mesh, settings);
        crate::infill::build_infill(&mut slices, &cfg);
        (slices, cfg)
    }
}
