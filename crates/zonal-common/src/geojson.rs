//! GeoJSON types for bucket payloads and reduced feature collections.
//!
//! Only polygonal geometry is storable; every other geometry type is carried
//! through deserialization so it can be rejected with a useful error instead
//! of a parse failure.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ZonalError, ZonalResult};

/// A [longitude, latitude] coordinate pair.
pub type Position = [f64; 2];

/// Polygon rings: exterior first, holes after.
pub type PolygonCoords = Vec<Vec<Position>>;

/// A set of polygons.
pub type MultiPolygonCoords = Vec<PolygonCoords>;

/// A GeoJSON FeatureCollection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureCollection {
    /// Type identifier (always "FeatureCollection").
    #[serde(rename = "type")]
    pub type_: String,

    /// Array of features.
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    /// Create a new empty FeatureCollection.
    pub fn new() -> Self {
        Self {
            type_: "FeatureCollection".to_string(),
            features: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Append all features of another collection.
    pub fn extend(&mut self, other: FeatureCollection) {
        self.features.extend(other.features);
    }
}

impl Default for FeatureCollection {
    fn default() -> Self {
        Self::new()
    }
}

/// A GeoJSON Feature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feature {
    /// Type identifier (always "Feature").
    #[serde(rename = "type")]
    pub type_: String,

    /// The geometry, absent on attribute-only features.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,

    /// Attribute properties.
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Feature {
    /// Create a feature with the given geometry and no properties.
    pub fn new(geometry: Geometry) -> Self {
        Self {
            type_: "Feature".to_string(),
            geometry: Some(geometry),
            properties: Map::new(),
        }
    }

    /// Look up a property value.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// GeoJSON geometry. Non-polygonal variants exist only to be rejected
/// with a geometry-type error during normalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Geometry {
    Polygon { coordinates: PolygonCoords },
    MultiPolygon { coordinates: MultiPolygonCoords },
    Point { coordinates: Value },
    MultiPoint { coordinates: Value },
    LineString { coordinates: Value },
    MultiLineString { coordinates: Value },
    GeometryCollection { geometries: Value },
}

impl Geometry {
    /// The GeoJSON type name, as found in the source payload.
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Polygon { .. } => "Polygon",
            Geometry::MultiPolygon { .. } => "MultiPolygon",
            Geometry::Point { .. } => "Point",
            Geometry::MultiPoint { .. } => "MultiPoint",
            Geometry::LineString { .. } => "LineString",
            Geometry::MultiLineString { .. } => "MultiLineString",
            Geometry::GeometryCollection { .. } => "GeometryCollection",
        }
    }

    /// Normalize to multi-polygon coordinates.
    ///
    /// Polygons are wrapped into a single-member multi-polygon; anything
    /// else is an error.
    pub fn into_multi_polygon(self) -> ZonalResult<MultiPolygonCoords> {
        match self {
            Geometry::Polygon { coordinates } => Ok(vec![coordinates]),
            Geometry::MultiPolygon { coordinates } => Ok(coordinates),
            other => Err(ZonalError::InvalidGeometry(format!(
                "must be Polygon or MultiPolygon, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Render multi-polygon coordinates as a GeoJSON geometry string,
/// suitable for `ST_GeomFromGeoJSON`.
pub fn multi_polygon_geojson(coordinates: &MultiPolygonCoords) -> ZonalResult<String> {
    let geometry = Geometry::MultiPolygon {
        coordinates: coordinates.clone(),
    };
    Ok(serde_json::to_string(&geometry)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> PolygonCoords {
        vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
    }

    #[test]
    fn test_polygon_normalizes_to_multi() {
        let geom = Geometry::Polygon { coordinates: square() };
        let multi = geom.into_multi_polygon().unwrap();
        assert_eq!(multi.len(), 1);
        assert_eq!(multi[0], square());
    }

    #[test]
    fn test_multi_polygon_passes_through() {
        let geom = Geometry::MultiPolygon {
            coordinates: vec![square(), square()],
        };
        assert_eq!(geom.into_multi_polygon().unwrap().len(), 2);
    }

    #[test]
    fn test_point_is_rejected() {
        let geom = Geometry::Point {
            coordinates: serde_json::json!([1.0, 2.0]),
        };
        let err = geom.into_multi_polygon().unwrap_err();
        assert!(err.to_string().contains("Point"));
    }

    #[test]
    fn test_feature_collection_roundtrip() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[0.0,0.0],[1.0,0.0],[1.0,1.0],[0.0,0.0]]]
                    },
                    "properties": {"ACRES": 12.5, "et_m06": 101.23}
                }
            ]
        }"#;

        let fc: FeatureCollection = serde_json::from_str(json).unwrap();
        assert_eq!(fc.len(), 1);
        assert_eq!(
            fc.features[0].property("et_m06").and_then(Value::as_f64),
            Some(101.23)
        );
    }

    #[test]
    fn test_multi_polygon_geojson_string() {
        let s = multi_polygon_geojson(&vec![square()]).unwrap();
        assert!(s.starts_with(r#"{"type":"MultiPolygon""#));
    }
}
