//! Structural validity checks for assembled geometries.
//!
//! These only detect problems, they never repair them. Callers decide whether an invalid
//! geometry is dropped, used anyway, or just reported.

use super::*;
use geo::{
    algorithm::line_intersection::{line_intersection, LineIntersection},
    BoundingRect,
    Contains,
    Intersects,
    Line,
    Winding,
};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidityFailure {
    /// A ring or line has too few distinct points to span anything.
    TooFewPoints,
    /// A coordinate is NaN or infinite.
    InvalidCoordinate,
    /// A ring is not closed.
    NotClosed,
    /// A ring winds the wrong way.
    WrongOrientation,
    /// Two non-adjacent segments of the same ring touch or cross.
    SelfIntersections,
    /// An inner ring is not inside its outer ring.
    InteriorRingOutside,
}

impl ValidityFailure {
    /// Failures that leave nothing usable to output.
    pub fn is_degenerate(self) -> bool {
        matches!(self, ValidityFailure::TooFewPoints)
    }
}

impl fmt::Display for ValidityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ValidityFailure::TooFewPoints => "too few points",
            ValidityFailure::InvalidCoordinate => "an invalid coordinate",
            ValidityFailure::NotClosed => "an open ring",
            ValidityFailure::WrongOrientation => "a wrongly oriented ring",
            ValidityFailure::SelfIntersections => "self-intersections",
            ValidityFailure::InteriorRingOutside => "an inner ring outside the outer ring",
        };
        f.write_str(text)
    }
}

pub fn check_linestring(line: &Linestring) -> Result<(), ValidityFailure> {
    check_coordinates(line)?;
    if distinct_points(line) < 2 {
        return Err(ValidityFailure::TooFewPoints);
    }
    Ok(())
}

pub fn check_polygon(polygon: &Polygon) -> Result<(), ValidityFailure> {
    check_ring(polygon.exterior(), true)?;
    if polygon.interiors().is_empty() {
        return Ok(());
    }
    let shell = Polygon::new(polygon.exterior().clone(), vec![]);
    for interior in polygon.interiors() {
        check_ring(interior, false)?;
        let inside = interior.0.iter().all(|c| shell.intersects(c))
            && interior.0.iter().any(|c| shell.contains(c));
        if !inside {
            return Err(ValidityFailure::InteriorRingOutside);
        }
    }
    Ok(())
}

pub fn check_multi_polygon(multi_polygon: &MultiPolygon) -> Result<(), ValidityFailure> {
    if multi_polygon.0.is_empty() {
        return Err(ValidityFailure::TooFewPoints);
    }
    multi_polygon.iter().try_for_each(check_polygon)
}

fn check_ring(ring: &Linestring, outer: bool) -> Result<(), ValidityFailure> {
    check_coordinates(ring)?;
    if ring.0.len() < MIN_RING_POINTS || distinct_points(ring) < 3 {
        return Err(ValidityFailure::TooFewPoints);
    }
    if !ring.is_closed() {
        return Err(ValidityFailure::NotClosed);
    }
    if has_self_intersections(ring) {
        return Err(ValidityFailure::SelfIntersections);
    }
    let oriented = if outer { ring.is_cw() } else { ring.is_ccw() };
    if !oriented {
        return Err(ValidityFailure::WrongOrientation);
    }
    Ok(())
}

fn check_coordinates(line: &Linestring) -> Result<(), ValidityFailure> {
    if line.0.iter().all(|c| c.x.is_finite() && c.y.is_finite()) {
        Ok(())
    } else {
        Err(ValidityFailure::InvalidCoordinate)
    }
}

fn distinct_points(line: &Linestring) -> usize {
    let mut coords: Vec<(u64, u64)> = line
        .0
        .iter()
        .map(|c| (c.x.to_bits(), c.y.to_bits()))
        .collect();
    coords.sort_unstable();
    coords.dedup();
    coords.len()
}

/// Sweep over the segments of a closed `ring` in order of their minimum x and test every
/// pair whose x-ranges overlap.
///
/// Adjacent segments may share their common endpoint, anything else counts as an intersection.
fn has_self_intersections(ring: &Linestring) -> bool {
    let lines: Vec<Line<f64>> = ring
        .lines()
        .filter(|line| line.start != line.end)
        .collect();
    let count = lines.len();
    if count < 3 {
        return false;
    }
    let mut order: Vec<usize> = (0..count).collect();
    order.sort_by(|&a, &b| min_x(&lines[a]).total_cmp(&min_x(&lines[b])));
    for (position, &i) in order.iter().enumerate() {
        let bounds_i = lines[i].bounding_rect();
        for &j in order[position + 1..].iter() {
            if min_x(&lines[j]) > bounds_i.max().x {
                break;
            }
            let adjacent = i.abs_diff(j) == 1 || i.abs_diff(j) == count - 1;
            match line_intersection(lines[i], lines[j]) {
                None => (),
                Some(LineIntersection::SinglePoint { intersection, .. }) if adjacent => {
                    let shared = shared_endpoint(&lines[i], &lines[j]);
                    if shared != Some(intersection) {
                        return true;
                    }
                }
                Some(_) => return true,
            }
        }
    }
    false
}

fn min_x(line: &Line<f64>) -> f64 {
    line.start.x.min(line.end.x)
}

fn shared_endpoint(a: &Line<f64>, b: &Line<f64>) -> Option<geo::Coord<f64>> {
    if a.end == b.start || a.end == b.end {
        Some(a.end)
    } else if a.start == b.start || a.start == b.end {
        Some(a.start)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, polygon};

    fn clockwise_square(size: f64) -> Polygon {
        correct_polygon(&polygon![
            (x: 0.0, y: 0.0),
            (x: size, y: 0.0),
            (x: size, y: size),
            (x: 0.0, y: size),
        ])
    }

    #[test]
    fn test_valid_polygon_with_hole() {
        let mut square = clockwise_square(10.0);
        square.interiors_push(line_string![
            (x: 4.0, y: 4.0),
            (x: 6.0, y: 4.0),
            (x: 6.0, y: 6.0),
            (x: 4.0, y: 6.0),
            (x: 4.0, y: 4.0),
        ]);
        let square = correct_polygon(&square);
        assert_eq!(check_polygon(&square), Ok(()));
        assert_eq!(
            check_multi_polygon(&MultiPolygon::new(vec![square])),
            Ok(())
        );
    }

    #[test]
    fn test_too_few_points() {
        let sliver = correct_polygon(&polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)]);
        assert_eq!(check_polygon(&sliver), Err(ValidityFailure::TooFewPoints));
        assert!(ValidityFailure::TooFewPoints.is_degenerate());
        assert_eq!(
            check_multi_polygon(&MultiPolygon::new(vec![])),
            Err(ValidityFailure::TooFewPoints)
        );
        let dot = line_string![(x: 1.0, y: 1.0), (x: 1.0, y: 1.0)];
        assert_eq!(check_linestring(&dot), Err(ValidityFailure::TooFewPoints));
        let line = line_string![(x: 1.0, y: 1.0), (x: 2.0, y: 1.0)];
        assert_eq!(check_linestring(&line), Ok(()));
    }

    #[test]
    fn test_wrong_orientation() {
        let counter_clockwise = polygon![
            (x: 0.0, y: 0.0),
            (x: 4.0, y: 0.0),
            (x: 4.0, y: 4.0),
            (x: 0.0, y: 4.0),
        ];
        assert_eq!(
            check_polygon(&counter_clockwise),
            Err(ValidityFailure::WrongOrientation)
        );
    }

    #[test]
    fn test_bow_tie_self_intersects() {
        let bow_tie = correct_polygon(&polygon![
            (x: 0.0, y: 0.0),
            (x: 4.0, y: 4.0),
            (x: 4.0, y: 0.0),
            (x: 0.0, y: 4.0),
        ]);
        assert_eq!(
            check_polygon(&bow_tie),
            Err(ValidityFailure::SelfIntersections)
        );
        let ring = line_string![
            (x: 0.0, y: 0.0),
            (x: 4.0, y: 4.0),
            (x: 4.0, y: 0.0),
            (x: 0.0, y: 4.0),
            (x: 0.0, y: 0.0),
        ];
        assert!(has_self_intersections(&ring));
        assert!(!has_self_intersections(clockwise_square(3.0).exterior()));
    }

    #[test]
    fn test_hole_outside() {
        let mut square = clockwise_square(10.0);
        square.interiors_push(line_string![
            (x: 20.0, y: 20.0),
            (x: 22.0, y: 20.0),
            (x: 22.0, y: 22.0),
            (x: 20.0, y: 22.0),
            (x: 20.0, y: 20.0),
        ]);
        let square = correct_polygon(&square);
        assert_eq!(
            check_polygon(&square),
            Err(ValidityFailure::InteriorRingOutside)
        );
    }

    #[test]
    fn test_invalid_coordinate() {
        let line = line_string![(x: f64::NAN, y: 1.0), (x: 2.0, y: 1.0)];
        assert_eq!(
            check_linestring(&line),
            Err(ValidityFailure::InvalidCoordinate)
        );
    }
}
