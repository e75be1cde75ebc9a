//! Slicer configuration.
//!
//! Settings come from a line-oriented `key = value` file, mirrored CLI flags
//! and `-S key=value` overrides. Unknown keys are fatal. The raw settings
//! are validated once, the derived scalars are computed once, and the
//! resulting [`Config`] is read-only for the rest of the run.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use strata_geom::clip::ClipCtx;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown setting `{key}`{}", fmt_line(.line))]
    UnknownKey { key: String, line: Option<usize> },
    #[error("bad value `{value}` for `{key}` (expected {expected}){}", fmt_line(.line))]
    BadValue {
        key: String,
        value: String,
        expected: &'static str,
        line: Option<usize>,
    },
    #[error("setting `{key}` out of range: {detail}")]
    OutOfRange { key: String, detail: String },
    #[error("missing `=` in `{text}`{}", fmt_line(.line))]
    MissingEquals { text: String, line: Option<usize> },
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
}

fn fmt_line(line: &Option<usize>) -> String {
    match line {
        Some(n) => format!(" at line {}", n),
        None => String::new(),
    }
}

/// Every accepted configuration key, for error reporting.
pub const KNOWN_KEYS: &[&str] = &[
    "layer_height", "extrusion_width", "tolerance", "scale_constant", "coarseness",
    "extra_offset", "packing_density", "edge_packing_density", "seam_packing_density",
    "combine_all", "poly_fill_rule", "shells", "infill_density", "infill_pattern",
    "solid_infill_angle", "sparse_infill_angle", "roof_thickness", "floor_thickness",
    "solid_infill_clip_offset", "solid_fill_expansion", "infill_overlap", "fill_threshold",
    "fill_inset_gaps", "min_sparse_infill_len", "connect_solid_infill",
    "infill_smooth_threshold", "iron_top_surface", "iron_density", "iron_flow_multiplier",
    "iron_feed_rate", "feed_rate", "edge_feed_rate", "first_layer_mult", "travel_feed_rate",
    "z_feed_rate", "min_feed_rate", "min_layer_time", "layer_time_samples", "flow_multiplier",
    "material_diameter", "material_density", "material_cost", "retract_len", "retract_speed",
    "restart_speed", "retract_min_travel", "retract_threshold", "retract_within_island",
    "moving_retract", "comb", "wipe_len", "coast_len", "anchor", "shell_clip", "align_seams",
    "align_interior_seams", "seam_angle", "outside_first", "strict_shell_order",
    "simplify_insets", "generate_support", "support_everywhere", "support_angle",
    "support_margin", "support_vert_margin", "support_xy_expansion", "support_density",
    "support_pattern", "support_flow_mult", "connect_support_lines",
    "support_connect_threshold", "support_wipe_len", "interface_roof_layers",
    "interface_floor_layers", "interface_density", "expand_interface", "solid_support_base",
    "min_support_len", "brim_width", "brim_adhesion_factor", "raft", "raft_xy_expansion",
    "raft_base_layer_height", "raft_base_layer_width", "raft_base_layer_density",
    "raft_vert_margin", "raft_interface_layers", "raft_base_layer_pattern", "x_translate",
    "y_translate", "z_chop", "separate_z_travel", "cool_on_layer", "start_gcode", "end_gcode",
    "cool_on_gcode", "cool_off_gcode", "layer_gcode",
];

/// Sparse infill pattern.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InfillPattern {
    /// Two crossed passes per layer at half density each.
    Grid,
    /// Three passes at 0, 60 and 120 degrees, a third of the density each.
    Triangle,
    /// One pass, rotated by 60 degrees per layer.
    Triangle2,
    /// One pass, alternating by 90 degrees per layer.
    Rectilinear,
}

/// Support and raft base pattern.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SupportPattern {
    Grid,
    Rectilinear,
}

/// Winding rule used when unioning the stitched outlines of a layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PolyFillRule {
    NonZero,
    EvenOdd,
}

/// Raw settings, exactly as configured.
#[derive(Clone, Debug)]
pub struct Settings {
    // Geometry.
    pub layer_height: f64,
    pub extrusion_width: f64,
    pub tolerance: f64,
    pub scale_constant: f64,
    pub coarseness: f64,
    pub extra_offset: f64,
    pub packing_density: f64,
    pub edge_packing_density: f64,
    pub seam_packing_density: f64,
    pub combine_all: bool,
    pub poly_fill_rule: PolyFillRule,

    // Shells and infill.
    pub shells: usize,
    pub infill_density: f64,
    pub infill_pattern: InfillPattern,
    pub solid_infill_angle: f64,
    pub sparse_infill_angle: f64,
    pub roof_thickness: f64,
    pub floor_thickness: f64,
    pub solid_infill_clip_offset: f64,
    pub solid_fill_expansion: f64,
    pub infill_overlap: f64,
    pub fill_threshold: f64,
    pub fill_inset_gaps: bool,
    pub min_sparse_infill_len: f64,
    pub connect_solid_infill: bool,
    pub infill_smooth_threshold: f64,
    pub iron_top_surface: bool,
    pub iron_density: f64,
    pub iron_flow_multiplier: f64,
    pub iron_feed_rate: f64,

    // Speeds and flow.
    pub feed_rate: f64,
    pub edge_feed_rate: f64,
    pub first_layer_mult: f64,
    pub travel_feed_rate: f64,
    pub z_feed_rate: f64,
    pub min_feed_rate: f64,
    pub min_layer_time: f64,
    pub layer_time_samples: usize,
    pub flow_multiplier: f64,
    pub material_diameter: f64,
    pub material_density: f64,
    pub material_cost: f64,

    // Retraction and travel.
    pub retract_len: f64,
    pub retract_speed: f64,
    pub restart_speed: f64,
    pub retract_min_travel: f64,
    pub retract_threshold: f64,
    pub retract_within_island: bool,
    pub moving_retract: bool,
    pub comb: bool,
    pub wipe_len: f64,
    pub coast_len: f64,
    pub anchor: bool,
    pub shell_clip: f64,
    pub align_seams: bool,
    pub align_interior_seams: bool,
    pub seam_angle: f64,
    pub outside_first: bool,
    pub strict_shell_order: bool,
    pub simplify_insets: bool,

    // Support.
    pub generate_support: bool,
    pub support_everywhere: bool,
    pub support_angle: f64,
    pub support_margin: f64,
    pub support_vert_margin: usize,
    pub support_xy_expansion: f64,
    pub support_density: f64,
    pub support_pattern: SupportPattern,
    pub support_flow_mult: f64,
    pub connect_support_lines: bool,
    pub support_connect_threshold: f64,
    pub support_wipe_len: f64,
    pub interface_roof_layers: usize,
    pub interface_floor_layers: usize,
    pub interface_density: f64,
    pub expand_interface: bool,
    pub solid_support_base: bool,
    pub min_support_len: f64,

    // Brim and raft.
    pub brim_width: f64,
    pub brim_adhesion_factor: f64,
    pub raft: bool,
    pub raft_xy_expansion: f64,
    pub raft_base_layer_height: f64,
    pub raft_base_layer_width: f64,
    pub raft_base_layer_density: f64,
    pub raft_vert_margin: f64,
    pub raft_interface_layers: usize,
    pub raft_base_layer_pattern: SupportPattern,

    // Machine and output.
    pub x_translate: f64,
    pub y_translate: f64,
    pub z_chop: f64,
    pub separate_z_travel: bool,
    pub cool_on_layer: usize,
    pub start_gcode: String,
    pub end_gcode: String,
    pub cool_on_gcode: String,
    pub cool_off_gcode: String,
    pub layer_gcode: String,
    pub user_vars: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            layer_height: 0.2,
            extrusion_width: 0.45,
            tolerance: 0.01,
            scale_constant: 1e6,
            coarseness: 0.01,
            extra_offset: 0.0,
            packing_density: 0.98,
            edge_packing_density: 0.95,
            seam_packing_density: 0.95,
            combine_all: false,
            poly_fill_rule: PolyFillRule::NonZero,

            shells: 2,
            infill_density: 0.2,
            infill_pattern: InfillPattern::Grid,
            solid_infill_angle: 45.0,
            sparse_infill_angle: 45.0,
            roof_thickness: 0.8,
            floor_thickness: 0.8,
            solid_infill_clip_offset: 0.45,
            solid_fill_expansion: 1.0,
            infill_overlap: 0.05,
            fill_threshold: 0.25,
            fill_inset_gaps: true,
            min_sparse_infill_len: 1.0,
            connect_solid_infill: true,
            infill_smooth_threshold: 2.0,
            iron_top_surface: false,
            iron_density: 3.0,
            iron_flow_multiplier: 0.1,
            iron_feed_rate: 0.0,

            feed_rate: 50.0,
            edge_feed_rate: 25.0,
            first_layer_mult: 0.5,
            travel_feed_rate: 120.0,
            z_feed_rate: 10.0,
            min_feed_rate: 10.0,
            min_layer_time: 8.0,
            layer_time_samples: 5,
            flow_multiplier: 1.0,
            material_diameter: 1.75,
            material_density: 1.25,
            material_cost: 25.0,

            retract_len: 1.0,
            retract_speed: 20.0,
            restart_speed: 0.0,
            retract_min_travel: 1.6,
            retract_threshold: 30.0,
            retract_within_island: false,
            moving_retract: false,
            comb: true,
            wipe_len: 0.0,
            coast_len: 0.0,
            anchor: false,
            shell_clip: 0.15,
            align_seams: true,
            align_interior_seams: true,
            seam_angle: 45.0,
            outside_first: false,
            strict_shell_order: false,
            simplify_insets: true,

            generate_support: false,
            support_everywhere: true,
            support_angle: 70.0,
            support_margin: 0.6,
            support_vert_margin: 1,
            support_xy_expansion: 0.2,
            support_density: 0.2,
            support_pattern: SupportPattern::Rectilinear,
            support_flow_mult: 0.75,
            connect_support_lines: false,
            support_connect_threshold: 0.0,
            support_wipe_len: 0.4,
            interface_roof_layers: 3,
            interface_floor_layers: 0,
            interface_density: 0.7,
            expand_interface: true,
            solid_support_base: false,
            min_support_len: 1.0,

            brim_width: 0.0,
            brim_adhesion_factor: 0.5,
            raft: false,
            raft_xy_expansion: 2.0,
            raft_base_layer_height: 0.3,
            raft_base_layer_width: 0.6,
            raft_base_layer_density: 0.6,
            raft_vert_margin: 0.2,
            raft_interface_layers: 1,
            raft_base_layer_pattern: SupportPattern::Rectilinear,

            x_translate: 0.0,
            y_translate: 0.0,
            z_chop: 0.0,
            separate_z_travel: false,
            cool_on_layer: 1,
            start_gcode: String::new(),
            end_gcode: String::new(),
            cool_on_gcode: "M106 S255".to_string(),
            cool_off_gcode: "M107".to_string(),
            layer_gcode: String::new(),
            user_vars: BTreeMap::new(),
        }
    }
}

macro_rules! parse_as {
    ($key:expr, $value:expr, $line:expr, $ty:ty, $expected:expr) => {
        $value
            .parse::<$ty>()
            .map_err(|_| ConfigError::BadValue {
                key: $key.to_string(),
                value: $value.to_string(),
                expected: $expected,
                line: $line,
            })?
    };
}

fn parse_bool(key: &str, value: &str, line: Option<usize>) -> Result<bool, ConfigError> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ConfigError::BadValue {
            key: key.to_string(),
            value: value.to_string(),
            expected: "true or false",
            line,
        }),
    }
}

impl Settings {
    /// Apply a single `key = value` pair. `line` is reported in errors when
    /// the pair came from a file.
    pub fn apply(&mut self, key: &str, value: &str, line: Option<usize>) -> Result<(), ConfigError> {
        if let Some(name) = key.strip_prefix("uservar.") {
            self.user_vars.insert(name.to_string(), value.to_string());
            return Ok(());
        }
        let f = |k: &str, v: &str| -> Result<f64, ConfigError> {
            Ok(parse_as!(k, v, line, f64, "a number"))
        };
        let i = |k: &str, v: &str| -> Result<usize, ConfigError> {
            Ok(parse_as!(k, v, line, usize, "a non-negative integer"))
        };
        match key {
            "layer_height" => self.layer_height = f(key, value)?,
            "extrusion_width" => self.extrusion_width = f(key, value)?,
            "tolerance" => self.tolerance = f(key, value)?,
            "scale_constant" => self.scale_constant = f(key, value)?,
            "coarseness" => self.coarseness = f(key, value)?,
            "extra_offset" => self.extra_offset = f(key, value)?,
            "packing_density" => self.packing_density = f(key, value)?,
            "edge_packing_density" => self.edge_packing_density = f(key, value)?,
            "seam_packing_density" => self.seam_packing_density = f(key, value)?,
            "combine_all" => self.combine_all = parse_bool(key, value, line)?,
            "poly_fill_rule" => {
                self.poly_fill_rule = match value {
                    "non_zero" => PolyFillRule::NonZero,
                    "even_odd" => PolyFillRule::EvenOdd,
                    _ => {
                        return Err(ConfigError::BadValue {
                            key: key.to_string(),
                            value: value.to_string(),
                            expected: "non_zero or even_odd",
                            line,
                        })
                    }
                }
            }
            "shells" => self.shells = i(key, value)?,
            "infill_density" => self.infill_density = f(key, value)?,
            "infill_pattern" => {
                self.infill_pattern = match value {
                    "grid" => InfillPattern::Grid,
                    "triangle" => InfillPattern::Triangle,
                    "triangle2" => InfillPattern::Triangle2,
                    "rectilinear" => InfillPattern::Rectilinear,
                    _ => {
                        return Err(ConfigError::BadValue {
                            key: key.to_string(),
                            value: value.to_string(),
                            expected: "grid, triangle, triangle2 or rectilinear",
                            line,
                        })
                    }
                }
            }
            "solid_infill_angle" => self.solid_infill_angle = f(key, value)?,
            "sparse_infill_angle" => self.sparse_infill_angle = f(key, value)?,
            "roof_thickness" => self.roof_thickness = f(key, value)?,
            "floor_thickness" => self.floor_thickness = f(key, value)?,
            "solid_infill_clip_offset" => self.solid_infill_clip_offset = f(key, value)?,
            "solid_fill_expansion" => self.solid_fill_expansion = f(key, value)?,
            "infill_overlap" => self.infill_overlap = f(key, value)?,
            "fill_threshold" => self.fill_threshold = f(key, value)?,
            "fill_inset_gaps" => self.fill_inset_gaps = parse_bool(key, value, line)?,
            "min_sparse_infill_len" => self.min_sparse_infill_len = f(key, value)?,
            "connect_solid_infill" => self.connect_solid_infill = parse_bool(key, value, line)?,
            "infill_smooth_threshold" => self.infill_smooth_threshold = f(key, value)?,
            "iron_top_surface" => self.iron_top_surface = parse_bool(key, value, line)?,
            "iron_density" => self.iron_density = f(key, value)?,
            "iron_flow_multiplier" => self.iron_flow_multiplier = f(key, value)?,
            "iron_feed_rate" => self.iron_feed_rate = f(key, value)?,
            "feed_rate" => self.feed_rate = f(key, value)?,
            "edge_feed_rate" => self.edge_feed_rate = f(key, value)?,
            "first_layer_mult" => self.first_layer_mult = f(key, value)?,
            "travel_feed_rate" => self.travel_feed_rate = f(key, value)?,
            "z_feed_rate" => self.z_feed_rate = f(key, value)?,
            "min_feed_rate" => self.min_feed_rate = f(key, value)?,
            "min_layer_time" => self.min_layer_time = f(key, value)?,
            "layer_time_samples" => self.layer_time_samples = i(key, value)?,
            "flow_multiplier" => self.flow_multiplier = f(key, value)?,
            "material_diameter" => self.material_diameter = f(key, value)?,
            "material_density" => self.material_density = f(key, value)?,
            "material_cost" => self.material_cost = f(key, value)?,
            "retract_len" => self.retract_len = f(key, value)?,
            "retract_speed" => self.retract_speed = f(key, value)?,
            "restart_speed" => self.restart_speed = f(key, value)?,
            "retract_min_travel" => self.retract_min_travel = f(key, value)?,
            "retract_threshold" => self.retract_threshold = f(key, value)?,
            "retract_within_island" => self.retract_within_island = parse_bool(key, value, line)?,
            "moving_retract" => self.moving_retract = parse_bool(key, value, line)?,
            "comb" => self.comb = parse_bool(key, value, line)?,
            "wipe_len" => self.wipe_len = f(key, value)?,
            "coast_len" => self.coast_len = f(key, value)?,
            "anchor" => self.anchor = parse_bool(key, value, line)?,
            "shell_clip" => self.shell_clip = f(key, value)?,
            "align_seams" => self.align_seams = parse_bool(key, value, line)?,
            "align_interior_seams" => self.align_interior_seams = parse_bool(key, value, line)?,
            "seam_angle" => self.seam_angle = f(key, value)?,
            "outside_first" => self.outside_first = parse_bool(key, value, line)?,
            "strict_shell_order" => self.strict_shell_order = parse_bool(key, value, line)?,
            "simplify_insets" => self.simplify_insets = parse_bool(key, value, line)?,
            "generate_support" => self.generate_support = parse_bool(key, value, line)?,
            "support_everywhere" => self.support_everywhere = parse_bool(key, value, line)?,
            "support_angle" => self.support_angle = f(key, value)?,
            "support_margin" => self.support_margin = f(key, value)?,
            "support_vert_margin" => self.support_vert_margin = i(key, value)?,
            "support_xy_expansion" => self.support_xy_expansion = f(key, value)?,
            "support_density" => self.support_density = f(key, value)?,
            "support_pattern" => self.support_pattern = parse_support_pattern(key, value, line)?,
            "support_flow_mult" => self.support_flow_mult = f(key, value)?,
            "connect_support_lines" => self.connect_support_lines = parse_bool(key, value, line)?,
            "support_connect_threshold" => self.support_connect_threshold = f(key, value)?,
            "support_wipe_len" => self.support_wipe_len = f(key, value)?,
            "interface_roof_layers" => self.interface_roof_layers = i(key, value)?,
            "interface_floor_layers" => self.interface_floor_layers = i(key, value)?,
            "interface_density" => self.interface_density = f(key, value)?,
            "expand_interface" => self.expand_interface = parse_bool(key, value, line)?,
            "solid_support_base" => self.solid_support_base = parse_bool(key, value, line)?,
            "min_support_len" => self.min_support_len = f(key, value)?,
            "brim_width" => self.brim_width = f(key, value)?,
            "brim_adhesion_factor" => self.brim_adhesion_factor = f(key, value)?,
            "raft" => self.raft = parse_bool(key, value, line)?,
            "raft_xy_expansion" => self.raft_xy_expansion = f(key, value)?,
            "raft_base_layer_height" => self.raft_base_layer_height = f(key, value)?,
            "raft_base_layer_width" => self.raft_base_layer_width = f(key, value)?,
            "raft_base_layer_density" => self.raft_base_layer_density = f(key, value)?,
            "raft_vert_margin" => self.raft_vert_margin = f(key, value)?,
            "raft_interface_layers" => self.raft_interface_layers = i(key, value)?,
            "raft_base_layer_pattern" => {
                self.raft_base_layer_pattern = parse_support_pattern(key, value, line)?
            }
            "x_translate" => self.x_translate = f(key, value)?,
            "y_translate" => self.y_translate = f(key, value)?,
            "z_chop" => self.z_chop = f(key, value)?,
            "separate_z_travel" => self.separate_z_travel = parse_bool(key, value, line)?,
            "cool_on_layer" => self.cool_on_layer = i(key, value)?,
            "start_gcode" => self.start_gcode = value.to_string(),
            "end_gcode" => self.end_gcode = value.to_string(),
            "cool_on_gcode" => self.cool_on_gcode = value.to_string(),
            "cool_off_gcode" => self.cool_off_gcode = value.to_string(),
            "layer_gcode" => self.layer_gcode = value.to_string(),
            _ => {
                return Err(ConfigError::UnknownKey {
                    key: key.to_string(),
                    line,
                })
            }
        }
        Ok(())
    }

    /// Current value of a setting, as text, for `{placeholder}` expansion
    /// in G-code templates.
    pub fn lookup(&self, key: &str) -> Option<String> {
        if let Some(name) = key.strip_prefix("uservar.") {
            return self.user_vars.get(name).cloned();
        }
        let s = match key {
            "layer_height" => self.layer_height.to_string(),
            "extrusion_width" => self.extrusion_width.to_string(),
            "tolerance" => self.tolerance.to_string(),
            "scale_constant" => self.scale_constant.to_string(),
            "coarseness" => self.coarseness.to_string(),
            "extra_offset" => self.extra_offset.to_string(),
            "packing_density" => self.packing_density.to_string(),
            "edge_packing_density" => self.edge_packing_density.to_string(),
            "seam_packing_density" => self.seam_packing_density.to_string(),
            "shells" => self.shells.to_string(),
            "infill_density" => self.infill_density.to_string(),
            "solid_infill_angle" => self.solid_infill_angle.to_string(),
            "sparse_infill_angle" => self.sparse_infill_angle.to_string(),
            "roof_thickness" => self.roof_thickness.to_string(),
            "floor_thickness" => self.floor_thickness.to_string(),
            "infill_overlap" => self.infill_overlap.to_string(),
            "fill_threshold" => self.fill_threshold.to_string(),
            "feed_rate" => self.feed_rate.to_string(),
            "edge_feed_rate" => self.edge_feed_rate.to_string(),
            "first_layer_mult" => self.first_layer_mult.to_string(),
            "travel_feed_rate" => self.travel_feed_rate.to_string(),
            "z_feed_rate" => self.z_feed_rate.to_string(),
            "min_feed_rate" => self.min_feed_rate.to_string(),
            "min_layer_time" => self.min_layer_time.to_string(),
            "layer_time_samples" => self.layer_time_samples.to_string(),
            "flow_multiplier" => self.flow_multiplier.to_string(),
            "material_diameter" => self.material_diameter.to_string(),
            "material_density" => self.material_density.to_string(),
            "material_cost" => self.material_cost.to_string(),
            "retract_len" => self.retract_len.to_string(),
            "retract_speed" => self.retract_speed.to_string(),
            "restart_speed" => self.restart_speed.to_string(),
            "retract_min_travel" => self.retract_min_travel.to_string(),
            "retract_threshold" => self.retract_threshold.to_string(),
            "wipe_len" => self.wipe_len.to_string(),
            "coast_len" => self.coast_len.to_string(),
            "shell_clip" => self.shell_clip.to_string(),
            "seam_angle" => self.seam_angle.to_string(),
            "support_angle" => self.support_angle.to_string(),
            "support_margin" => self.support_margin.to_string(),
            "support_xy_expansion" => self.support_xy_expansion.to_string(),
            "support_density" => self.support_density.to_string(),
            "support_flow_mult" => self.support_flow_mult.to_string(),
            "interface_density" => self.interface_density.to_string(),
            "brim_width" => self.brim_width.to_string(),
            "brim_adhesion_factor" => self.brim_adhesion_factor.to_string(),
            "raft_xy_expansion" => self.raft_xy_expansion.to_string(),
            "raft_base_layer_height" => self.raft_base_layer_height.to_string(),
            "raft_base_layer_width" => self.raft_base_layer_width.to_string(),
            "raft_base_layer_density" => self.raft_base_layer_density.to_string(),
            "x_translate" => self.x_translate.to_string(),
            "y_translate" => self.y_translate.to_string(),
            "z_chop" => self.z_chop.to_string(),
            "cool_on_layer" => self.cool_on_layer.to_string(),
            _ => return None,
        };
        Some(s)
    }

    /// Parse `key=value` (as passed to `-S`).
    pub fn apply_override(&mut self, pair: &str) -> Result<(), ConfigError> {
        let (key, value) = pair.split_once('=').ok_or_else(|| ConfigError::MissingEquals {
            text: pair.to_string(),
            line: None,
        })?;
        self.apply(key.trim(), value.trim(), None)
    }

    /// Parse a whole config file body. `#` starts a comment line; a line
    /// led by whitespace continues the previous value.
    pub fn apply_str(&mut self, text: &str) -> Result<(), ConfigError> {
        let mut pending: Option<(String, String, usize)> = None;
        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            if raw.trim_start().starts_with('#') {
                continue;
            }
            if raw.starts_with(' ') || raw.starts_with('\t') {
                if let Some((_, value, _)) = pending.as_mut() {
                    value.push('\n');
                    value.push_str(raw.trim());
                    continue;
                }
            }
            if let Some((key, value, at)) = pending.take() {
                self.apply(&key, &value, Some(at))?;
            }
            if raw.trim().is_empty() {
                continue;
            }
            let (key, value) = raw.split_once('=').ok_or_else(|| ConfigError::MissingEquals {
                text: raw.to_string(),
                line: Some(line_no),
            })?;
            pending = Some((key.trim().to_string(), value.trim().to_string(), line_no));
        }
        if let Some((key, value, at)) = pending.take() {
            self.apply(&key, &value, Some(at))?;
        }
        Ok(())
    }

    pub fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = fs::read_to_string(path)?;
        self.apply_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let check = |ok: bool, key: &str, detail: &str| -> Result<(), ConfigError> {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::OutOfRange {
                    key: key.to_string(),
                    detail: detail.to_string(),
                })
            }
        };
        check(self.layer_height > 0.0, "layer_height", "must be positive")?;
        check(self.extrusion_width > 0.0, "extrusion_width", "must be positive")?;
        check(self.scale_constant > 0.0, "scale_constant", "must be positive")?;
        check(self.tolerance >= 0.0, "tolerance", "must not be negative")?;
        check(
            self.infill_density > 0.0 && self.infill_density <= 1.0,
            "infill_density",
            "must be in (0, 1]",
        )?;
        check(
            self.support_density > 0.0 && self.support_density <= 1.0,
            "support_density",
            "must be in (0, 1]",
        )?;
        check(
            self.interface_density > 0.0 && self.interface_density <= 1.0,
            "interface_density",
            "must be in (0, 1]",
        )?;
        check(self.shells >= 1, "shells", "at least one shell is required")?;
        check(
            self.packing_density > 0.0 && self.packing_density <= 1.0,
            "packing_density",
            "must be in (0, 1]",
        )?;
        check(self.feed_rate > 0.0, "feed_rate", "must be positive")?;
        check(self.travel_feed_rate > 0.0, "travel_feed_rate", "must be positive")?;
        check(self.material_diameter > 0.0, "material_diameter", "must be positive")?;
        check(
            self.raft_base_layer_height >= self.layer_height,
            "raft_base_layer_height",
            "must be at least layer_height",
        )?;
        check(
            self.brim_adhesion_factor >= 0.0 && self.brim_adhesion_factor <= 1.0,
            "brim_adhesion_factor",
            "must be in [0, 1]",
        )?;
        Ok(())
    }
}

fn parse_support_pattern(
    key: &str,
    value: &str,
    line: Option<usize>,
) -> Result<SupportPattern, ConfigError> {
    match value {
        "grid" => Ok(SupportPattern::Grid),
        "rectilinear" => Ok(SupportPattern::Rectilinear),
        _ => Err(ConfigError::BadValue {
            key: key.to_string(),
            value: value.to_string(),
            expected: "grid or rectilinear",
            line,
        }),
    }
}

/// Scalars computed once from the validated settings.
#[derive(Clone, Debug)]
pub struct Derived {
    /// Cross-section area of one extruded track.
    pub extrusion_area: f64,
    /// Unconstrained outer-edge stroke width.
    pub edge_width: f64,
    /// Signed inward offset applied to the outline before shell 0 (negative).
    pub edge_offset: f64,
    /// Cross-section area of the raw filament.
    pub material_area: f64,
    /// Margin added around the object bounds when generating fill patterns.
    pub xy_extra: f64,
    /// Extra object height introduced by the raft stack.
    pub object_z_extra: f64,
    /// `solid_infill_clip_offset` clamped to the extrusion width.
    pub solid_infill_clip_offset: f64,
    /// Number of fully solid layers at the bottom.
    pub floor_layers: usize,
    /// Number of fully solid layers at the top.
    pub roof_layers: usize,
}

impl Derived {
    fn compute(s: &Settings) -> Derived {
        let h = s.layer_height;
        let w = s.extrusion_width;
        let quarter_pi = std::f64::consts::FRAC_PI_4;
        let extrusion_area = w * h - (h * h - h * h * quarter_pi) * (1.0 - s.packing_density);
        let edge_width = (extrusion_area - h * h * quarter_pi) / h + h;
        let edge_offset = -(edge_width + (edge_width - w) * (1.0 - s.edge_packing_density)) / 2.0;
        let material_area = std::f64::consts::PI * s.material_diameter * s.material_diameter / 4.0;

        let mut xy_extra = s.extra_offset.max(0.0) + s.brim_width + edge_width;
        if s.raft {
            xy_extra += s.raft_xy_expansion;
        }
        if s.generate_support {
            xy_extra += s.support_xy_expansion + (0.5 + s.support_margin) * edge_width;
        }
        let object_z_extra = if s.raft {
            s.raft_base_layer_height
                + s.raft_vert_margin
                + s.raft_interface_layers as f64 * s.layer_height
        } else {
            0.0
        };

        Derived {
            extrusion_area,
            edge_width,
            edge_offset,
            material_area,
            xy_extra,
            object_z_extra,
            solid_infill_clip_offset: s.solid_infill_clip_offset.min(w),
            floor_layers: (s.floor_thickness / h).round() as usize,
            roof_layers: (s.roof_thickness / h).round() as usize,
        }
    }
}

/// The read-only configuration record threaded through every stage.
#[derive(Clone, Debug)]
pub struct Config {
    pub s: Settings,
    pub d: Derived,
}

impl Config {
    pub fn new(settings: Settings) -> Result<Config, ConfigError> {
        settings.validate()?;
        let derived = Derived::compute(&settings);
        Ok(Config {
            s: settings,
            d: derived,
        })
    }

    /// A clipping-engine context on this configuration's lattice.
    pub fn ctx(&self) -> ClipCtx {
        ClipCtx::new(self.s.scale_constant)
    }

    /// Height of the slicing plane of layer `i`.
    pub fn plane_z(&self, i: usize) -> f64 {
        (i as f64 + 0.5) * self.s.layer_height
    }

    /// Emitted z of layer `i` (top of the layer plus the raft stack).
    pub fn layer_z(&self, i: usize) -> f64 {
        i as f64 * self.s.layer_height + self.s.layer_height + self.d.object_z_extra
    }

    /// Extruder feed length for a track of `len` millimeters at flow
    /// adjustment `adjust`.
    pub fn extrusion_len(&self, len: f64, adjust: f64) -> f64 {
        len * self.d.extrusion_area * self.s.flow_multiplier * adjust / self.d.material_area
    }

    /// Inward offset of the infill region relative to the innermost shell.
    pub fn infill_inset_offset(&self) -> f64 {
        (0.5 - self.s.infill_overlap) * self.s.extrusion_width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::new(Settings::default()).is_ok());
    }

    #[test]
    fn derived_matches_formulas() {
        let cfg = Config::new(Settings::default()).unwrap();
        let h = 0.2;
        let w = 0.45;
        let ea = w * h - (h * h - h * h * std::f64::consts::FRAC_PI_4) * (1.0 - 0.98);
        assert!((cfg.d.extrusion_area - ea).abs() < 1e-12);
        let ew = (ea - h * h * std::f64::consts::FRAC_PI_4) / h + h;
        assert!((cfg.d.edge_width - ew).abs() < 1e-12);
        assert!(cfg.d.edge_offset < 0.0);
        assert_eq!(cfg.d.floor_layers, 4);
        assert_eq!(cfg.d.roof_layers, 4);
    }

    #[test]
    fn unknown_key_is_fatal_with_line_number() {
        let mut s = Settings::default();
        let err = s.apply_str("layer_height = 0.3\nbogus_key = 1\n").unwrap_err();
        match err {
            ConfigError::UnknownKey { key, line } => {
                assert_eq!(key, "bogus_key");
                assert_eq!(line, Some(2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn continuation_lines_join_with_newlines() {
        let mut s = Settings::default();
        s.apply_str("start_gcode = G28\n G1 Z5 F5000\n M109 S210\nlayer_height = 0.1\n")
            .unwrap();
        assert_eq!(s.start_gcode, "G28\nG1 Z5 F5000\nM109 S210");
        assert_eq!(s.layer_height, 0.1);
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let mut s = Settings::default();
        s.apply_str("# a comment\n\nshells = 3\n").unwrap();
        assert_eq!(s.shells, 3);
    }

    #[test]
    fn uservars_are_collected() {
        let mut s = Settings::default();
        s.apply_str("uservar.temp = 215\n").unwrap();
        assert_eq!(s.user_vars.get("temp").map(String::as_str), Some("215"));
    }

    #[test]
    fn bad_enum_spelling_reports_expectation() {
        let mut s = Settings::default();
        let err = s.apply("infill_pattern", "hexagon", Some(7)).unwrap_err();
        assert!(matches!(err, ConfigError::BadValue { .. }));
    }

    #[test]
    fn out_of_range_rejected_at_validation() {
        let mut s = Settings::default();
        s.apply("infill_density", "0", None).unwrap();
        assert!(Config::new(s).is_err());
    }

    #[test]
    fn every_known_key_is_accepted_by_apply() {
        for key in KNOWN_KEYS {
            let mut s = Settings::default();
            let result = s.apply(key, "1", None);
            assert!(
                !matches!(result, Err(ConfigError::UnknownKey { .. })),
                "`{}` is listed but rejected",
                key
            );
        }
    }

    #[test]
    fn overrides_parse_key_value_pairs() {
        let mut s = Settings::default();
        s.apply_override("shells=4").unwrap();
        assert_eq!(s.shells, 4);
        assert!(s.apply_override("shells").is_err());
    }
}
