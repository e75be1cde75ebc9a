//! strata — a fused-filament slicer.
//!
//! This meta-crate re-exports the member crates and hosts the pipeline
//! driver that runs the stages in order:
//!
//! * `strata_geom` — lattice scalars, segments, boxes, patterns and the
//!   clipping-engine interface.
//! * `strata_core` — mesh input, slicing, insets, infill, support, brim.
//! * `strata_plan` — motion planning and G-code emission.
//!
//! ```ignore
//! let mesh = strata::core::Mesh::from_stl("model.stl")?;
//! let cfg = strata::core::Config::new(settings)?;
//! let sliced = strata::pipeline::slice_object(mesh, &cfg);
//! let plans = strata::pipeline::plan_object(&sliced, &cfg);
//! strata::plan::gcode::write_gcode(&mut out, &cfg, &plans)?;
//! ```

pub use strata_core as core;
pub use strata_geom as geom;
pub use strata_plan as plan;

pub mod pipeline;
