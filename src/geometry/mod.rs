//! Planar geometry in projected degrees (`x` = longitude, `y` = Mercator latitude).
//!
//! All types are the `geo` crate's, fixed to `f64`. Polygons follow the ring convention
//! of the tile encoder: outer rings wind clockwise, inner rings counter-clockwise, and
//! every ring is explicitly closed.

use crate::osm_data::LatpLon;
use geo::{
    orient::{Direction, Orient},
    Coord,
};

pub mod assembly;
pub mod validity;

pub type Point = geo::Point<f64>;
pub type Linestring = geo::LineString<f64>;
pub type MultiLinestring = geo::MultiLineString<f64>;
pub type Polygon = geo::Polygon<f64>;
pub type MultiPolygon = geo::MultiPolygon<f64>;
pub type Geometry = geo::Geometry<f64>;

/// A closed ring needs at least three distinct points plus the closing point.
pub const MIN_RING_POINTS: usize = 4;

pub fn linestring_from(points: &[LatpLon]) -> Linestring {
    points.iter().map(|p| p.to_coord()).collect::<Vec<Coord<f64>>>().into()
}

/// Close all rings and bring them into the outer-clockwise/inner-counter-clockwise convention.
pub fn correct_polygon(polygon: &Polygon) -> Polygon {
    // Polygon construction closes open rings
    let closed = Polygon::new(polygon.exterior().clone(), polygon.interiors().to_vec());
    closed.orient(Direction::Reversed)
}

pub fn correct_multi_polygon(multi_polygon: &MultiPolygon) -> MultiPolygon {
    MultiPolygon::new(multi_polygon.iter().map(correct_polygon).collect())
}
