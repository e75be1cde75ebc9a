//! Conversions between real millimeters and the clipping engine's lattice.
//!
//! The engine works on signed 64-bit integer coordinates. A configurable
//! `scale_constant` maps millimeters onto that lattice: `cint = round(flt *
//! scale_constant)`, `flt = cint / scale_constant`. Heights stay in real
//! units throughout and are only discretized at G-code emission.

use crate::Point;

/// Default lattice scale: one millimeter is one million lattice units.
pub const DEFAULT_SCALE: f64 = 1e6;

/// Real millimeters to lattice units.
#[inline]
pub fn to_lattice(v: f64, scale: f64) -> i64 {
    (v * scale).round() as i64
}

/// Lattice units back to real millimeters.
#[inline]
pub fn from_lattice(c: i64, scale: f64) -> f64 {
    c as f64 / scale
}

/// Snap a real coordinate onto the lattice.
#[inline]
pub fn snap(v: f64, scale: f64) -> f64 {
    from_lattice(to_lattice(v, scale), scale)
}

/// Lattice key of a point, usable for exact-match hashing.
#[inline]
pub fn lattice_key(p: Point, scale: f64) -> (i64, i64) {
    (to_lattice(p.x, scale), to_lattice(p.y, scale))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_within_one_lattice_unit() {
        let scale = DEFAULT_SCALE;
        for &v in &[0.0, 0.1, -0.1, 10.0, 123.456789, -99.999999, 0.0000004] {
            let back = from_lattice(to_lattice(v, scale), scale);
            assert!((back - v).abs() <= 1.0 / scale, "{} -> {}", v, back);
        }
    }

    #[test]
    fn snap_is_idempotent() {
        let scale = 1e3;
        let s = snap(1.23456789, scale);
        assert_eq!(s, snap(s, scale));
    }

    #[test]
    fn lattice_key_separates_points_beyond_resolution() {
        let scale = DEFAULT_SCALE;
        let a = crate::point(1.0, 2.0);
        let b = crate::point(1.0 + 2.0 / scale, 2.0);
        assert_ne!(lattice_key(a, scale), lattice_key(b, scale));
    }
}
