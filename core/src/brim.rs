//! S7: build-plate adhesion — brim rings and the raft.

use geo::{LineString, MultiLineString, MultiPolygon};
use strata_geom::clip::Join;

use crate::config::Config;
use crate::patterns::Patterns;
use crate::Slice;

/// Layer-0 adhesion geometry, generated once.
#[derive(Clone, Debug)]
pub struct BrimRaft {
    /// Concentric brim rings, innermost first.
    pub rings: Vec<MultiPolygon<f64>>,
    /// Wide-stroke raft base lines.
    pub raft_base: MultiLineString<f64>,
    /// Raft interface lines, replicated for every interface layer.
    pub raft_interface: MultiLineString<f64>,
    /// Flow multiplier for the wide raft base stroke.
    pub raft_flow_adjust: f64,
}

impl Default for BrimRaft {
    fn default() -> Self {
        BrimRaft {
            rings: Vec::new(),
            raft_base: MultiLineString::new(vec![]),
            raft_interface: MultiLineString::new(vec![]),
            raft_flow_adjust: f64::default(),
        }
    }
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

pub fn build_brim_raft(slices: &[Slice], cfg: &Config, patterns: &Patterns) -> BrimRaft {
    let ctx = cfg.ctx();
    let w = cfg.s.extrusion_width;
    let mut out = BrimRaft {
        raft_flow_adjust: (cfg.s.raft_base_layer_height * cfg.s.raft_base_layer_width)
            / (cfg.s.layer_height * cfg.s.extrusion_width),
        ..BrimRaft::default()
    };

    let Some(first) = slices.first() else {
        return out;
    };
    let mut base = ctx.union_all(first.islands.iter().map(|isl| isl.insets[0].clone()));
    if cfg.s.generate_support {
        base = ctx.union(&base, &first.support.map);
    }
    if base.0.is_empty() {
        return out;
    }

    let brim_lines = (cfg.s.brim_width / w).round() as usize;
    // The first ring hugs the outline; low adhesion factors push it out so
    // it only kisses the edge stroke.
    let standoff = (-cfg.d.edge_offset * 2.0 - w) * (1.0 - cfg.s.brim_adhesion_factor) * 2.0;
    for k in 1..=brim_lines {
        let delta = k as f64 * w + standoff;
        let ring = ctx.offset_removing(&base, delta, w / 2.0, Join::Square);
        out.rings.push(ctx.simplify(&ring, cfg.s.coarseness));
    }

    if cfg.s.raft {
        let footprint_seed = out.rings.last().unwrap_or(&base);
        let footprint = ctx.offset(footprint_seed, cfg.s.raft_xy_expansion, Join::Square);
        out.raft_base = to_segments(ctx.clip_lines(&footprint, &patterns.raft_base));
        out.raft_interface = to_segments(ctx.clip_lines(&footprint, &patterns.solid_base));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::mesh::shapes;
    use crate::test_support::slice_mesh;
    use strata_geom::clip::area;

    #[test]
    fn brim_ring_count_follows_the_width() {
        let mut settings = Settings::default();
        settings.brim_width = 5.0;
        settings.extrusion_width = 0.5;
        let mesh = shapes::cuboid([0.0, 0.0, 0.0], [10.0, 10.0, 2.0]);
        let (slices, cfg) = slice_mesh(mesh, settings);
        let patterns = Patterns::generate(&cfg, (0.0, 0.0, 10.0, 10.0));
        let brim = build_brim_raft(&slices, &cfg, &patterns);
        assert_eq!(brim.rings.len(), 10);
        // Rings grow monotonically.
        for k in 1..brim.rings.len() {
            assert!(area(&brim.rings[k]) > area(&brim.rings[k - 1]));
        }
    }

    #[test]
    fn no_brim_without_width() {
        let mesh = shapes::cuboid([0.0, 0.0, 0.0], [10.0, 10.0, 2.0]);
        let (slices, cfg) = slice_mesh(mesh, Settings::default());
        let patterns = Patterns::generate(&cfg, (0.0, 0.0, 10.0, 10.0));
        let brim = build_brim_raft(&slices, &cfg, &patterns);
        assert!(brim.rings.is_empty());
        assert!(brim.raft_base.0.is_empty());
    }

    #[test]
    fn raft_lines_cover_the_expanded_footprint() {
        let mut settings = Settings::default();
        settings.raft = true;
        let mesh = shapes::cuboid([0.0, 0.0, 0.0], [10.0, 10.0, 2.0]);
        let (slices, cfg) = slice_mesh(mesh, settings);
        let patterns = Patterns::generate(&cfg, (0.0, 0.0, 10.0, 10.0));
        let brim = build_brim_raft(&slices, &cfg, &patterns);
        assert!(!brim.raft_base.0.is_empty());
        assert!(!brim.raft_interface.0.is_empty());
        assert!(brim.raft_flow_adjust > 1.0);
        // Base lines extend past the object outline.
        let reach = brim
            .raft_base
            .0
            .iter()
            .flat_map(|ls| ls.0.iter())
            .fold(f64::MIN, |m, c| m.max(c.x));
        assert!(reach > 10.0);
    }
}
