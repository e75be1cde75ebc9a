//! Straight-line fill pattern generation.
//!
//! A pattern is an unclipped set of parallel open lines spanning a bounding
//! box, generated at an arbitrary angle and row spacing. The infill, support
//! and raft builders intersect these lines with their regions; nothing here
//! knows what the lines will fill.

use euclid::default::Rotation2D;
use euclid::{Angle, Point2D};
use geo::{LineString, MultiLineString};

use crate::Point;

/// Generate parallel lines covering `bounds` (min_x, min_y, max_x, max_y in
/// millimeters), oriented at `angle`, one row every `spacing` along the
/// normal to the line direction.
///
/// The bounds are rotated by `-angle`, scanned row by row with row index
/// anchored at the origin (so patterns of equal angle and spacing line up
/// across layers), and each scanline is rotated back.
pub fn line_fill_at_angle(
    bounds: (f64, f64, f64, f64),
    angle: Angle<f64>,
    spacing: f64,
) -> MultiLineString<f64> {
    let (min_x, min_y, max_x, max_y) = bounds;
    if spacing <= 0.0 || min_x > max_x || min_y > max_y {
        return MultiLineString::new(vec![]);
    }

    let inverse = Rotation2D::new(-angle);
    let forward = Rotation2D::new(angle);

    let corners = [
        Point2D::new(min_x, min_y),
        Point2D::new(max_x, min_y),
        Point2D::new(max_x, max_y),
        Point2D::new(min_x, max_y),
    ];
    let mut rx0 = f64::MAX;
    let mut ry0 = f64::MAX;
    let mut rx1 = f64::MIN;
    let mut ry1 = f64::MIN;
    for c in &corners {
        let r = inverse.transform_point(*c);
        rx0 = rx0.min(r.x);
        ry0 = ry0.min(r.y);
        rx1 = rx1.max(r.x);
        ry1 = ry1.max(r.y);
    }

    let first = (ry0 / spacing).floor() as i64;
    let last = (ry1 / spacing).ceil() as i64;

    let mut lines = Vec::with_capacity((last - first + 1).max(0) as usize);
    for i in first..=last {
        let y = i as f64 * spacing;
        let a = forward.transform_point(Point2D::new(rx0, y));
        let b = forward.transform_point(Point2D::new(rx1, y));
        lines.push(LineString::new(vec![
            Point { x: a.x, y: a.y },
            Point { x: b.x, y: b.y },
        ]));
    }
    MultiLineString::new(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_count(bounds: (f64, f64, f64, f64), deg: f64, spacing: f64) -> usize {
        line_fill_at_angle(bounds, Angle::degrees(deg), spacing).0.len()
    }

    #[test]
    fn horizontal_fill_spans_the_box() {
        let lines = line_fill_at_angle((0.0, 0.0, 10.0, 4.0), Angle::degrees(0.0), 1.0);
        // Rows at y = 0..=4.
        assert_eq!(lines.0.len(), 5);
        for ls in &lines.0 {
            assert!((ls.0[0].y - ls.0[1].y).abs() < 1e-9);
            assert!((ls.0[1].x - ls.0[0].x).abs() >= 10.0 - 1e-9);
        }
    }

    #[test]
    fn spacing_controls_row_count() {
        assert!(line_count((0.0, 0.0, 10.0, 10.0), 0.0, 0.5) > line_count((0.0, 0.0, 10.0, 10.0), 0.0, 2.0));
    }

    #[test]
    fn rotated_fill_keeps_direction() {
        let lines = line_fill_at_angle((0.0, 0.0, 10.0, 10.0), Angle::degrees(45.0), 1.0);
        assert!(!lines.0.is_empty());
        for ls in &lines.0 {
            let dx = ls.0[1].x - ls.0[0].x;
            let dy = ls.0[1].y - ls.0[0].y;
            // Direction parallel to 45 degrees.
            assert!((dx - dy).abs() < 1e-6 * dx.abs().max(1.0));
        }
    }

    #[test]
    fn rows_are_anchored_at_the_origin() {
        // Same angle and spacing over two different boxes produce collinear rows.
        let a = line_fill_at_angle((0.0, 0.15, 5.0, 3.0), Angle::degrees(0.0), 1.0);
        let b = line_fill_at_angle((0.0, -1.9, 5.0, 3.0), Angle::degrees(0.0), 1.0);
        for ls in a.0.iter() {
            assert!(
                b.0.iter().any(|other| (other.0[0].y - ls.0[0].y).abs() < 1e-9),
                "row y={} missing from the wider pattern",
                ls.0[0].y
            );
        }
    }

    #[test]
    fn degenerate_inputs_produce_nothing() {
        assert_eq!(line_count((0.0, 0.0, 10.0, 10.0), 0.0, 0.0), 0);
        assert_eq!(line_count((5.0, 5.0, -5.0, 10.0), 0.0, 1.0), 0);
    }
}
