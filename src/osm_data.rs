use geo::Coord;
use get_size::GetSize;
use std::{collections::BTreeMap, fmt};

/// Identifier of a node in the input dataset.
pub type NodeId = i64;
/// Identifier of a way in the input dataset.
///
/// Relations that are processed as area features get synthetic way ids from the
/// negative range, so they never collide with real (positive) way ids.
pub type WayId = i64;
/// Identifier of a relation in the input dataset.
pub type RelationId = i64;

/// Tags of a single element, ordered by key.
pub type TagMap = BTreeMap<String, String>;

const PRECISION_FACTOR: f64 = 1e7;

/// Latitudes beyond this cannot be represented in spherical Mercator.
pub const MAX_MERCATOR_LATITUDE: f64 = 85.0511;

/// A projected coordinate in fixed-point representation.
///
/// `lon` is plain degrees and `latp` is the Mercator-projected latitude in degrees,
/// both multiplied by 10^7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, GetSize)]
pub struct LatpLon {
    pub latp: i32,
    pub lon: i32,
}

impl LatpLon {
    pub const fn new(latp: i32, lon: i32) -> Self {
        LatpLon { latp, lon }
    }

    /// Project a WGS84 `lat`/`lon` pair (in degrees) into fixed-point form.
    pub fn from_degrees(lat: f64, lon: f64) -> Self {
        let lat = lat.clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE);
        LatpLon::from_projected_degrees(lat_to_latp(lat), lon)
    }

    /// Build from an already projected latitude.
    pub fn from_projected_degrees(latp: f64, lon: f64) -> Self {
        LatpLon {
            latp: (latp * PRECISION_FACTOR).round() as i32,
            lon: (lon * PRECISION_FACTOR).round() as i32,
        }
    }

    pub fn lon_degrees(&self) -> f64 {
        (self.lon as f64) / PRECISION_FACTOR
    }

    pub fn latp_degrees(&self) -> f64 {
        (self.latp as f64) / PRECISION_FACTOR
    }

    /// Unprojected latitude in degrees.
    pub fn lat_degrees(&self) -> f64 {
        latp_to_lat(self.latp_degrees())
    }

    /// The planar coordinate used for all geometry work (`x` = lon, `y` = latp).
    pub fn to_coord(self) -> Coord<f64> {
        Coord {
            x: self.lon_degrees(),
            y: self.latp_degrees(),
        }
    }
}

impl fmt::Display for LatpLon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}ᵖ)", self.lon_degrees(), self.latp_degrees())
    }
}

pub fn lat_to_latp(lat: f64) -> f64 {
    ((lat + 90.0).to_radians() / 2.0).tan().ln().to_degrees()
}

pub fn latp_to_lat(latp: f64) -> f64 {
    2.0 * latp.to_radians().exp().atan().to_degrees() - 90.0
}

/// Build a [TagMap] from anything that yields key/value pairs.
pub fn tag_map<I, K, V>(tags: I) -> TagMap
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    tags.into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}
