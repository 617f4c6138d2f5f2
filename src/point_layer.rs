//! Point layers read from GeoJSON.
//!
//! Geometries are converted to [`geo_types`]; properties become an ordered
//! attribute table whose columns follow first appearance across features.

use std::path::{Path, PathBuf};

use geo_types::{Geometry, Point};
use geojson::{FeatureCollection, GeoJson, JsonObject};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::geometry::projection::{ProjectionError, Reprojector};

/// CRS assumed when a document does not declare one (RFC 7946).
pub const DEFAULT_CRS: i32 = 4326;

#[derive(Debug, Error)]
pub enum PointLayerError {
    #[error("cannot read point layer {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("unsupported CRS declaration: {0}")]
    UnsupportedCrs(String),

    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

/// One feature: its geometry (if any) and one attribute per layer field.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Option<Geometry<f64>>,
    /// Values aligned with [`PointLayer::fields`]; absent properties are `Null`
    pub attributes: Vec<Value>,
}

impl Feature {
    /// The point, when the geometry is of point kind.
    #[must_use]
    pub fn point(&self) -> Option<Point<f64>> {
        match &self.geometry {
            Some(Geometry::Point(p)) => Some(*p),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointLayer {
    /// EPSG code of the geometries
    pub crs: i32,
    pub fields: Vec<String>,
    pub features: Vec<Feature>,
}

impl PointLayer {
    /// Load a GeoJSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid GeoJSON.
    pub fn from_geojson_path<P: AsRef<Path>>(path: P) -> Result<Self, PointLayerError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| PointLayerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let layer = Self::from_geojson_str(&text)?;
        debug!(
            path = %path.display(),
            crs = layer.crs,
            features = layer.features.len(),
            fields = layer.fields.len(),
            "Loaded point layer"
        );
        Ok(layer)
    }

    /// Parse a FeatureCollection, a single Feature or a bare Geometry.
    ///
    /// # Errors
    /// Returns an error if the text is not GeoJSON or declares an unrecognised CRS.
    pub fn from_geojson_str(text: &str) -> Result<Self, PointLayerError> {
        let collection = match text.parse::<GeoJson>()? {
            GeoJson::FeatureCollection(collection) => collection,
            GeoJson::Feature(feature) => FeatureCollection {
                bbox: None,
                features: vec![feature],
                foreign_members: None,
            },
            GeoJson::Geometry(geometry) => FeatureCollection {
                bbox: None,
                features: vec![geojson::Feature {
                    geometry: Some(geometry),
                    ..Default::default()
                }],
                foreign_members: None,
            },
        };

        let crs = match collection.foreign_members.as_ref().and_then(|m| m.get("crs")) {
            Some(member) => crs_from_member(member)?,
            None => DEFAULT_CRS,
        };

        let mut fields: Vec<String> = Vec::new();
        for feature in &collection.features {
            for key in feature.properties.iter().flat_map(JsonObject::keys) {
                if !fields.contains(key) {
                    fields.push(key.clone());
                }
            }
        }

        let features = collection
            .features
            .into_iter()
            .map(|feature| {
                let attributes = fields
                    .iter()
                    .map(|field| {
                        feature
                            .properties
                            .as_ref()
                            .and_then(|p| p.get(field))
                            .cloned()
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                let geometry = feature.geometry.map(Geometry::<f64>::try_from).transpose()?;
                Ok(Feature { geometry, attributes })
            })
            .collect::<Result<Vec<_>, PointLayerError>>()?;

        Ok(Self { crs, fields, features })
    }

    /// Reproject every point geometry to `epsg`.
    ///
    /// Non-point geometries are carried unchanged; the sampler skips them.
    ///
    /// # Errors
    /// Returns an error if the transform cannot be built or a point fails to project.
    pub fn to_crs(mut self, epsg: i32) -> Result<Self, PointLayerError> {
        let reprojector = Reprojector::new(self.crs, epsg)?;
        if reprojector.is_identity() {
            return Ok(self);
        }
        for feature in &mut self.features {
            if let Some(Geometry::Point(point)) = &mut feature.geometry {
                let (x, y) = reprojector.project(point.x(), point.y())?;
                *point = Point::new(x, y);
            }
        }
        debug!(from = self.crs, to = epsg, "Reprojected point layer");
        self.crs = epsg;
        Ok(self)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// EPSG code from a legacy `{"type": "name", "properties": {"name": ...}}` member.
fn crs_from_member(member: &Value) -> Result<i32, PointLayerError> {
    let name = member
        .pointer("/properties/name")
        .and_then(Value::as_str)
        .ok_or_else(|| PointLayerError::UnsupportedCrs(member.to_string()))?;
    parse_crs_name(name).ok_or_else(|| PointLayerError::UnsupportedCrs(name.to_string()))
}

/// `EPSG:32632`, `urn:ogc:def:crs:EPSG::32632` or the OGC CRS84 aliases.
fn parse_crs_name(name: &str) -> Option<i32> {
    if name.ends_with("CRS84") {
        return Some(DEFAULT_CRS);
    }
    let (authority, code) = name.rsplit_once(':')?;
    if !authority.to_ascii_uppercase().contains("EPSG") {
        return None;
    }
    code.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const PLOTS: &str = r#"{
        "type": "FeatureCollection",
        "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::4326"}},
        "features": [
            {"type": "Feature", "properties": {"plot": "A1", "species": "oak"},
             "geometry": {"type": "Point", "coordinates": [9.0, 0.0]}},
            {"type": "Feature", "properties": {"plot": "A2", "area": 12.5},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}},
            {"type": "Feature", "properties": null, "geometry": null}
        ]
    }"#;

    #[test]
    fn test_parse_feature_collection() {
        let layer = PointLayer::from_geojson_str(PLOTS).unwrap();
        assert_eq!(layer.crs, 4326);
        assert_eq!(layer.fields, vec!["plot", "species", "area"]);
        assert_eq!(layer.len(), 3);

        let first = &layer.features[0];
        assert_eq!(first.point(), Some(Point::new(9.0, 0.0)));
        assert_eq!(first.attributes, vec![Value::from("A1"), Value::from("oak"), Value::Null]);

        let second = &layer.features[1];
        assert!(second.point().is_none());
        assert!(matches!(second.geometry, Some(Geometry::Polygon(_))));
        assert_eq!(second.attributes[2], Value::from(12.5));

        assert!(layer.features[2].geometry.is_none());
        assert_eq!(layer.features[2].attributes, vec![Value::Null; 3]);
    }

    #[test]
    fn test_default_and_named_crs() {
        let bare = r#"{"type": "Point", "coordinates": [1.0, 2.0]}"#;
        let layer = PointLayer::from_geojson_str(bare).unwrap();
        assert_eq!(layer.crs, DEFAULT_CRS);
        assert!(layer.fields.is_empty());

        assert_eq!(parse_crs_name("EPSG:32632"), Some(32632));
        assert_eq!(parse_crs_name("urn:ogc:def:crs:EPSG::3035"), Some(3035));
        assert_eq!(parse_crs_name("urn:ogc:def:crs:OGC:1.3:CRS84"), Some(4326));
        assert_eq!(parse_crs_name("ESRI:102001"), None);
    }

    #[test]
    fn test_unsupported_crs() {
        let text = r#"{"type": "FeatureCollection",
            "crs": {"type": "name", "properties": {"name": "ESRI:102001"}},
            "features": []}"#;
        assert!(matches!(
            PointLayer::from_geojson_str(text),
            Err(PointLayerError::UnsupportedCrs(_))
        ));
    }

    #[test]
    fn test_invalid_input() {
        assert!(matches!(
            PointLayer::from_geojson_str("{\"type\": \"Nope\"}"),
            Err(PointLayerError::GeoJson(_))
        ));
        assert!(matches!(
            PointLayer::from_geojson_path("/nonexistent/points.geojson"),
            Err(PointLayerError::Io { .. })
        ));
    }

    #[test]
    fn test_to_crs_reprojects_points() {
        let layer = PointLayer::from_geojson_str(PLOTS).unwrap();
        let polygon = layer.features[1].geometry.clone();
        let utm = layer.to_crs(32632).unwrap();
        assert_eq!(utm.crs, 32632);
        // Equator on the zone 32 central meridian
        let p = utm.features[0].point().unwrap();
        assert_abs_diff_eq!(p.x(), 500_000.0, epsilon = 1e-3);
        assert_abs_diff_eq!(p.y(), 0.0, epsilon = 1e-3);
        assert_eq!(utm.features[1].geometry, polygon);
    }

    #[test]
    fn test_to_same_crs_is_noop() {
        let layer = PointLayer::from_geojson_str(PLOTS).unwrap();
        let same = layer.clone().to_crs(4326).unwrap();
        assert_eq!(same, layer);
    }
}
