//! S4: global fill pattern sets.
//!
//! Patterns are generated once over the enlarged object bounds and clipped
//! per layer. Per-island solid and sparse passes are described here too, as
//! (angle, spacing) recipes the infill builder instantiates on demand.

use euclid::Angle;
use geo::MultiLineString;
use strata_geom::pattern::line_fill_at_angle;

use crate::config::{Config, InfillPattern, SupportPattern};

/// Global line sets shared by every layer.
#[derive(Clone, Debug)]
pub struct Patterns {
    /// Enlarged object bounds the patterns span (min_x, min_y, max_x, max_y).
    pub bounds: (f64, f64, f64, f64),
    /// Dense base pattern: raft interface layers and the solid support base.
    pub solid_base: MultiLineString<f64>,
    /// Support body pattern.
    pub support: MultiLineString<f64>,
    /// Support interface pattern, perpendicular and denser.
    pub support_interface: MultiLineString<f64>,
    /// Wide-stroke raft base pattern.
    pub raft_base: MultiLineString<f64>,
}

/// One or two passes depending on the pattern kind; each pass is
/// (angle in degrees, row spacing in millimeters).
fn pattern_passes(kind: SupportPattern, angle: f64, density: f64, w: f64) -> Vec<(f64, f64)> {
    match kind {
        SupportPattern::Rectilinear => vec![(angle, w / density)],
        SupportPattern::Grid => vec![
            (angle, w / (density / 2.0)),
            (angle + 90.0, w / (density / 2.0)),
        ],
    }
}

fn generate(bounds: (f64, f64, f64, f64), passes: &[(f64, f64)]) -> MultiLineString<f64> {
    let mut lines = Vec::new();
    for &(angle, spacing) in passes {
        lines.extend(line_fill_at_angle(bounds, Angle::degrees(angle), spacing).0);
    }
    MultiLineString::new(lines)
}

impl Patterns {
    /// Generate every global pattern over `object_bounds` (in millimeters,
    /// before the `xy_extra` margin is applied).
    pub fn generate(cfg: &Config, object_bounds: (f64, f64, f64, f64)) -> Patterns {
        let (x0, y0, x1, y1) = object_bounds;
        let m = cfg.d.xy_extra;
        let bounds = (x0 - m, y0 - m, x1 + m, y1 + m);
        let w = cfg.s.extrusion_width;
        let a = cfg.s.solid_infill_angle;

        let solid_base = generate(bounds, &[(a + 90.0, w)]);
        let support = generate(
            bounds,
            &pattern_passes(cfg.s.support_pattern, a - 45.0, cfg.s.support_density, w),
        );
        let support_interface = generate(
            bounds,
            &pattern_passes(
                cfg.s.support_pattern,
                a + 45.0,
                cfg.s.interface_density,
                w,
            ),
        );
        let raft_density = (w / cfg.s.raft_base_layer_width) * cfg.s.raft_base_layer_density;
        let raft_base = generate(
            bounds,
            &pattern_passes(cfg.s.raft_base_layer_pattern, a, raft_density, w),
        );

        Patterns {
            bounds,
            solid_base,
            support,
            support_interface,
            raft_base,
        }
    }
}

/// Solid infill angle of a slice: rectilinear, alternating 90 degrees per
/// layer.
pub fn solid_angle(cfg: &Config, slice: usize) -> f64 {
    cfg.s.solid_infill_angle + if slice % 2 == 1 { 90.0 } else { 0.0 }
}

/// Sparse infill passes of a slice, per the configured pattern.
pub fn sparse_passes(cfg: &Config, slice: usize) -> Vec<(f64, f64)> {
    let w = cfg.s.extrusion_width;
    let d = cfg.s.infill_density;
    let a = cfg.s.sparse_infill_angle;
    match cfg.s.infill_pattern {
        InfillPattern::Grid => vec![
            (a, w / (d / 2.0)),
            (a + 90.0, w / (d / 2.0)),
        ],
        InfillPattern::Triangle => vec![
            (0.0, w / (d / 3.0)),
            (60.0, w / (d / 3.0)),
            (120.0, w / (d / 3.0)),
        ],
        InfillPattern::Triangle2 => vec![(a + 60.0 * slice as f64, w / d)],
        InfillPattern::Rectilinear => {
            vec![(a + if slice % 2 == 1 { 90.0 } else { 0.0 }, w / d)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn cfg() -> Config {
        Config::new(Settings::default()).unwrap()
    }

    #[test]
    fn patterns_cover_the_expanded_bounds() {
        let cfg = cfg();
        let p = Patterns::generate(&cfg, (0.0, 0.0, 20.0, 20.0));
        assert!(p.bounds.0 < 0.0 && p.bounds.2 > 20.0);
        assert!(!p.solid_base.0.is_empty());
        assert!(!p.support.0.is_empty());
        assert!(!p.support_interface.0.is_empty());
        assert!(!p.raft_base.0.is_empty());
    }

    #[test]
    fn support_is_sparser_than_interface() {
        let cfg = cfg();
        let p = Patterns::generate(&cfg, (0.0, 0.0, 50.0, 50.0));
        assert!(p.support.0.len() < p.support_interface.0.len());
    }

    #[test]
    fn grid_infill_crosses_two_ways() {
        let cfg = cfg();
        let passes = sparse_passes(&cfg, 0);
        assert_eq!(passes.len(), 2);
        assert!((passes[1].0 - passes[0].0 - 90.0).abs() < 1e-9);
        // Half density per pass: spacing doubles.
        assert!((passes[0].1 - cfg.s.extrusion_width / 0.1).abs() < 1e-9);
    }

    #[test]
    fn rectilinear_alternates_per_layer() {
        let mut settings = Settings::default();
        settings.infill_pattern = InfillPattern::Rectilinear;
        let cfg = Config::new(settings).unwrap();
        let a0 = sparse_passes(&cfg, 0)[0].0;
        let a1 = sparse_passes(&cfg, 1)[0].0;
        assert!((a1 - a0 - 90.0).abs() < 1e-9);
    }

    #[test]
    fn solid_angle_alternates_per_layer() {
        let cfg = cfg();
        assert!((solid_angle(&cfg, 2) - solid_angle(&cfg, 3)).abs() > 1.0);
    }
}
