//! Motion planning and G-code emission.
//!
//! The planner turns a sliced object into ordered [`GMove`] records per
//! layer: shells with seam handling, clipping, coasting and wiping; infill
//! with smoothing and connection; support lines; combed travel with the
//! retraction policy. Emission scales feed rates for cooling and writes
//! the G-code text.

pub mod comb;
pub mod gcode;
pub mod planner;
pub mod shells;
pub mod sched;
pub mod speed;

pub use planner::{plan_layer, Planner};

use strata_core::Config;

/// A planned motion record.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GMove {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Extruder delta: positive extrudes, negative retracts, zero travels.
    pub e: f64,
    /// Feed rate in mm/s.
    pub feed: f64,
    /// Whether cooling and first-layer scaling may touch this move.
    pub scalable: bool,
    pub is_travel: bool,
    /// Un-retract before resuming extrusion.
    pub is_restart: bool,
}

/// Mutable planner state: where the machine is and what the extruder is
/// doing.
#[derive(Copy, Clone, Debug)]
pub struct Machine {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Accumulated extrusion.
    pub e: f64,
    pub feed: f64,
    pub is_retracted: bool,
    /// The next travel must retract no matter how short it is.
    pub force_retract: bool,
}

impl Machine {
    /// State at the start of a layer. Each layer plans from the build-plate
    /// origin with a forced retract pending, which keeps per-layer planning
    /// independent (and parallel) without changing what is emitted: the
    /// previous layer always ends by forcing a retract anyway.
    pub fn at_layer_start(z: f64) -> Machine {
        Machine {
            x: 0.0,
            y: 0.0,
            z,
            e: 0.0,
            feed: 0.0,
            is_retracted: false,
            force_retract: true,
        }
    }
}

/// One layer's planned moves plus its estimated duration.
#[derive(Clone, Debug, Default)]
pub struct LayerPlan {
    pub index: usize,
    pub moves: Vec<GMove>,
    /// Estimated seconds at planned feed rates.
    pub layer_time: f64,
}

/// Feed rate for a shell at nesting level `level`.
pub fn shell_feed(cfg: &Config, level: usize) -> f64 {
    if level == 0 {
        cfg.s.edge_feed_rate
    } else {
        cfg.s.feed_rate
    }
}
