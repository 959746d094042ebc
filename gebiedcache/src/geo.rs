//! GeoJSON subset and bounding-box helpers.
//!
//! Only the parts of GeoJSON that the geometry backend returns are modelled.
//! Positions are kept as `Vec<f64>` so that 3D positions (with altitude)
//! deserialize; only the first two ordinates (`lon`, `lat`) are used.

use serde::{Deserialize, Serialize};

/// Default latitude buffer added around an area (~500 m).
pub const DEFAULT_BUFFER_LAT_DEG: f64 = 0.0045;

/// Default longitude buffer added around an area (~500 m at 52°N).
pub const DEFAULT_BUFFER_LON_DEG: f64 = 0.006;

/// A GeoJSON position: `[lon, lat]` or `[lon, lat, alt]`.
pub type Position = Vec<f64>;

/// GeoJSON geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    GeometryCollection { geometries: Vec<Geometry> },
}

impl Geometry {
    /// All `(lon, lat)` pairs in this geometry, flattened.
    ///
    /// Recurses into collections. Positions with fewer than two ordinates are
    /// skipped.
    pub fn positions(&self) -> Vec<(f64, f64)> {
        let mut out = Vec::new();
        self.collect_positions(&mut out);
        out
    }

    fn collect_positions(&self, out: &mut Vec<(f64, f64)>) {
        match self {
            Self::Point { coordinates } => push_position(out, coordinates),
            Self::MultiPoint { coordinates } | Self::LineString { coordinates } => {
                coordinates.iter().for_each(|p| push_position(out, p));
            }
            Self::MultiLineString { coordinates } | Self::Polygon { coordinates } => {
                coordinates
                    .iter()
                    .flatten()
                    .for_each(|p| push_position(out, p));
            }
            Self::MultiPolygon { coordinates } => {
                coordinates
                    .iter()
                    .flatten()
                    .flatten()
                    .for_each(|p| push_position(out, p));
            }
            Self::GeometryCollection { geometries } => {
                for geometry in geometries {
                    geometry.collect_positions(out);
                }
            }
        }
    }
}

fn push_position(out: &mut Vec<(f64, f64)>, position: &Position) {
    if let [lon, lat, ..] = position.as_slice() {
        out.push((*lon, *lat));
    }
}

/// A GeoJSON feature as returned by the PDOK OGC API.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

impl Feature {
    /// Creates a feature with the given geometry and no properties.
    pub fn from_geometry(geometry: Geometry) -> Self {
        Self {
            id: None,
            properties: serde_json::Map::new(),
            geometry: Some(geometry),
        }
    }

    /// A string property, if present.
    pub fn property_str(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(|v| v.as_str())
    }

    /// Bounding box of the feature's geometry, if it has any positions.
    pub fn bbox(&self) -> Option<BoundingBox> {
        self.geometry.as_ref().and_then(BoundingBox::from_geometry)
    }
}

/// A GeoJSON feature collection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(default)]
    pub features: Vec<Feature>,
}

/// Buffer added on every side of a bounding box, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BboxBuffer {
    pub lat_deg: f64,
    pub lon_deg: f64,
}

impl BboxBuffer {
    /// No buffer.
    pub const NONE: BboxBuffer = BboxBuffer {
        lat_deg: 0.0,
        lon_deg: 0.0,
    };

    pub fn new(lat_deg: f64, lon_deg: f64) -> Self {
        Self { lat_deg, lon_deg }
    }
}

impl Default for BboxBuffer {
    fn default() -> Self {
        Self {
            lat_deg: DEFAULT_BUFFER_LAT_DEG,
            lon_deg: DEFAULT_BUFFER_LON_DEG,
        }
    }
}

/// Rectangular geographic extent in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundingBox {
    /// Creates a bounding box from its edges.
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self {
            south,
            west,
            north,
            east,
        }
    }

    /// Smallest box containing every `(lon, lat)` pair, or `None` if empty.
    pub fn from_positions<I>(positions: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        positions.into_iter().fold(None, |acc, (lon, lat)| {
            Some(match acc {
                None => Self::new(lat, lon, lat, lon),
                Some(b) => Self::new(
                    b.south.min(lat),
                    b.west.min(lon),
                    b.north.max(lat),
                    b.east.max(lon),
                ),
            })
        })
    }

    /// Bounding box of a geometry, or `None` if it has no positions.
    pub fn from_geometry(geometry: &Geometry) -> Option<Self> {
        Self::from_positions(geometry.positions())
    }

    /// Returns this box grown by `buffer` on every side.
    pub fn buffered(&self, buffer: BboxBuffer) -> Self {
        Self::new(
            self.south - buffer.lat_deg,
            self.west - buffer.lon_deg,
            self.north + buffer.lat_deg,
            self.east + buffer.lon_deg,
        )
    }

    /// Whether the point lies inside or on the edge of the box.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.south..=self.north).contains(&lat) && (self.west..=self.east).contains(&lon)
    }

    /// Overpass QL bbox filter: `south,west,north,east`.
    pub fn to_overpass(&self) -> String {
        format!("{},{},{},{}", self.south, self.west, self.north, self.east)
    }
}
