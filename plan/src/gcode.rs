//! G-code emission.
//!
//! Each planned move becomes a `G1` line carrying only the coordinate
//! components that changed, with 3 decimal places for coordinates, 5 for
//! the extruder, and integer feed rates in units per minute (floor 1).
//! The extruder total is zeroed between layers. User template blocks are
//! emitted verbatim with `{setting}` and `{uservar}` placeholders
//! substituted.

use std::fmt::Write as _;
use std::io::{self, Write};

use log::warn;
use strata_core::Config;
use strata_geom::line::distance;
use strata_geom::point;

use crate::LayerPlan;

/// End-of-print material accounting.
#[derive(Copy, Clone, Debug, Default)]
pub struct PrintTotals {
    /// Filament consumed, millimeters.
    pub material_len: f64,
    /// Grams.
    pub material_mass: f64,
    /// In the configured currency per kilogram.
    pub material_cost: f64,
    /// Seconds, after cooling scaling.
    pub print_time: f64,
}

fn fmt3(v: f64) -> String {
    format!("{:.3}", v)
}

/// Expand `{placeholder}`s against user variables and settings. User
/// variable bodies are expanded one level deep against settings only, so a
/// variable cannot recurse into another variable.
pub fn expand_template(text: &str, cfg: &Config) -> String {
    expand(text, cfg, true)
}

fn expand(text: &str, cfg: &Config, allow_user_vars: bool) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push('{');
            rest = after;
            continue;
        };
        let name = &after[..close];
        if allow_user_vars {
            if let Some(body) = cfg.s.user_vars.get(name) {
                out.push_str(&expand(body, cfg, false));
                rest = &after[close + 1..];
                continue;
            }
        }
        match cfg.s.lookup(name) {
            Some(value) => out.push_str(&value),
            None => warn!("unknown placeholder `{{{}}}` in G-code template", name),
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

struct Emitter<'a, W: Write> {
    w: &'a mut W,
    cfg: &'a Config,
    x: Option<String>,
    y: Option<String>,
    z: Option<String>,
    feed: Option<i64>,
    e_total: f64,
}

impl<'a, W: Write> Emitter<'a, W> {
    fn new(w: &'a mut W, cfg: &'a Config) -> Self {
        Emitter {
            w,
            cfg,
            x: None,
            y: None,
            z: None,
            feed: None,
            e_total: 0.0,
        }
    }

    fn block(&mut self, text: &str) -> io::Result<()> {
        if !text.is_empty() {
            writeln!(self.w, "{}", expand_template(text, self.cfg))?;
        }
        Ok(())
    }

    fn g1(
        &mut self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        e: f64,
        feed_mm_s: f64,
    ) -> io::Result<()> {
        let mut line = String::from("G1");
        if let Some(x) = x {
            let s = fmt3(x);
            if self.x.as_deref() != Some(s.as_str()) {
                let _ = write!(line, " X{}", s);
                self.x = Some(s);
            }
        }
        if let Some(y) = y {
            let s = fmt3(y);
            if self.y.as_deref() != Some(s.as_str()) {
                let _ = write!(line, " Y{}", s);
                self.y = Some(s);
            }
        }
        if let Some(z) = z {
            let s = fmt3(z);
            if self.z.as_deref() != Some(s.as_str()) {
                let _ = write!(line, " Z{}", s);
                self.z = Some(s);
            }
        }
        if e != 0.0 {
            self.e_total += e;
            let _ = write!(line, " E{:.5}", self.e_total);
        }
        let f = ((feed_mm_s * 60.0).round() as i64).max(1);
        if self.feed != Some(f) {
            let _ = write!(line, " F{}", f);
            self.feed = Some(f);
        }
        if line.len() > 2 {
            writeln!(self.w, "{}", line)?;
        }
        Ok(())
    }
}

/// Write the whole program and return the totals.
pub fn write_gcode<W: Write>(
    w: &mut W,
    cfg: &Config,
    plans: &[LayerPlan],
) -> io::Result<PrintTotals> {
    let mut em = Emitter::new(w, cfg);
    em.block(&cfg.s.start_gcode)?;

    let mut totals = PrintTotals::default();
    let mut extruded = 0.0;

    for plan in plans {
        if plan.index == cfg.s.cool_on_layer && !cfg.s.cool_on_gcode.is_empty() {
            em.block(&cfg.s.cool_on_gcode)?;
        }
        em.block(&cfg.s.layer_gcode)?;

        // Each layer is planned from a fictional origin; the first real
        // position is established by its first travel. Until then (and for
        // anchor dots and restarts) extruder-only moves carry no
        // coordinates.
        let mut prev: Option<(f64, f64, f64)> = None;
        for mv in &plan.moves {
            let (xy_changed, z_changed) = match prev {
                None => (mv.is_travel, true),
                Some((px, py, pz)) => (
                    distance(point(px, py), point(mv.x, mv.y)) > 1e-9,
                    (pz - mv.z).abs() > 1e-9,
                ),
            };
            let stationary = mv.e != 0.0 && !mv.is_travel && !xy_changed && (prev.is_none() || !z_changed);
            let feed = if mv.is_travel && z_changed && !xy_changed {
                cfg.s.z_feed_rate
            } else {
                mv.feed
            };
            if stationary {
                em.g1(None, None, None, mv.e, mv.feed)?;
            } else if cfg.s.separate_z_travel && mv.is_travel && z_changed && xy_changed {
                em.g1(None, None, Some(mv.z), 0.0, cfg.s.z_feed_rate)?;
                em.g1(Some(mv.x), Some(mv.y), None, 0.0, mv.feed)?;
            } else {
                em.g1(Some(mv.x), Some(mv.y), Some(mv.z), mv.e, feed)?;
            }
            if mv.e > 0.0 {
                extruded += mv.e;
            }
            prev = Some((mv.x, mv.y, mv.z));
        }

        writeln!(em.w, "G92 E0")?;
        em.e_total = 0.0;
        totals.print_time += plan.layer_time;
    }

    em.block(&cfg.s.cool_off_gcode)?;
    em.block(&cfg.s.end_gcode)?;

    totals.material_len = extruded;
    totals.material_mass = extruded * cfg.d.material_area * cfg.s.material_density
        / 1000.0
        / cfg.s.flow_multiplier;
    totals.material_cost = totals.material_mass / 1000.0 * cfg.s.material_cost;

    writeln!(em.w, "; material length = {:.2} mm", totals.material_len)?;
    writeln!(em.w, "; material mass = {:.2} g", totals.material_mass)?;
    writeln!(em.w, "; material cost = {:.2}", totals.material_cost)?;
    writeln!(em.w, "; estimated print time = {:.0} s", totals.print_time)?;
    Ok(totals)
}

/// Write a gnuplot script drawing every extrusion move, one plot block per
/// layer.
pub fn write_preview<W: Write>(w: &mut W, plans: &[LayerPlan]) -> io::Result<()> {
    writeln!(w, "set size ratio -1")?;
    for plan in plans {
        writeln!(w, "set title 'layer {}'", plan.index)?;
        writeln!(w, "plot '-' with lines notitle")?;
        let mut prev: Option<(f64, f64)> = None;
        let mut drawing = false;
        for mv in &plan.moves {
            if mv.e > 0.0 && !mv.is_travel {
                if let (Some((px, py)), false) = (prev, drawing) {
                    writeln!(w)?;
                    writeln!(w, "{:.3} {:.3}", px, py)?;
                }
                writeln!(w, "{:.3} {:.3}", mv.x, mv.y)?;
                drawing = true;
            } else {
                drawing = false;
            }
            prev = Some((mv.x, mv.y));
        }
        writeln!(w, "e")?;
        writeln!(w, "pause -1")?;
    }
    Ok(())
}
