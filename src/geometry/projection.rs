//! Coordinate transforms between EPSG codes using pure Rust (proj4rs + crs-definitions).
//!
//! Point layers are brought into the raster CRS once, up front, through a
//! [`Reprojector`] that parses both projection definitions a single time and
//! is then applied to every coordinate.

use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use thiserror::Error;

/// Errors raised while resolving or applying a projection.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("EPSG:{0} is not in the crs-definitions database")]
    UnknownEpsg(i32),

    #[error("invalid projection definition for EPSG:{epsg}: {message}")]
    InvalidDefinition { epsg: i32, message: String },

    #[error("transform from EPSG:{from} to EPSG:{to} failed: {message}")]
    Transform { from: i32, to: i32, message: String },
}

/// Get the PROJ4 string for an EPSG code from the crs-definitions database.
#[inline]
#[must_use]
pub fn get_proj_string(epsg: i32) -> Option<&'static str> {
    u16::try_from(epsg)
        .ok()
        .and_then(crs_definitions::from_code)
        .map(|def| def.proj4)
}

/// Check if an EPSG code represents a geographic (lon/lat) CRS.
#[inline]
#[must_use]
pub fn is_geographic_crs(epsg: i32) -> bool {
    if let Some(proj_str) = get_proj_string(epsg) {
        proj_str.contains("+proj=longlat")
    } else {
        epsg == 4326 || (4000..5000).contains(&epsg)
    }
}

/// A prepared transform from one EPSG code to another.
pub struct Reprojector {
    source_epsg: i32,
    target_epsg: i32,
    // None when source and target are the same CRS
    projs: Option<(Proj, Proj)>,
    source_geographic: bool,
    target_geographic: bool,
}

impl std::fmt::Debug for Reprojector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reprojector")
            .field("source_epsg", &self.source_epsg)
            .field("target_epsg", &self.target_epsg)
            .finish_non_exhaustive()
    }
}

impl Reprojector {
    /// Prepare a transform from `source_epsg` to `target_epsg`.
    ///
    /// # Errors
    /// Returns an error if either code is unknown or its definition does not parse.
    pub fn new(source_epsg: i32, target_epsg: i32) -> Result<Self, ProjectionError> {
        let projs = if source_epsg == target_epsg {
            None
        } else {
            Some((parse_proj(source_epsg)?, parse_proj(target_epsg)?))
        };
        Ok(Self {
            source_epsg,
            target_epsg,
            projs,
            source_geographic: is_geographic_crs(source_epsg),
            target_geographic: is_geographic_crs(target_epsg),
        })
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.projs.is_none()
    }

    /// Transform one coordinate. Geographic coordinates are in degrees.
    ///
    /// # Errors
    /// Returns an error if proj4rs rejects the coordinate.
    pub fn project(&self, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
        let Some((source, target)) = &self.projs else {
            return Ok((x, y));
        };

        // proj4rs works in radians for geographic systems
        let mut point = if self.source_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        transform(source, target, &mut point).map_err(|e| ProjectionError::Transform {
            from: self.source_epsg,
            to: self.target_epsg,
            message: format!("{e:?}"),
        })?;

        if self.target_geographic {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }
}

fn parse_proj(epsg: i32) -> Result<Proj, ProjectionError> {
    let definition = get_proj_string(epsg).ok_or(ProjectionError::UnknownEpsg(epsg))?;
    Proj::from_proj_string(definition).map_err(|e| ProjectionError::InvalidDefinition {
        epsg,
        message: format!("{e:?}"),
    })
}

/// Project a single point from one CRS to another.
///
/// No-op if both codes are equal.
///
/// # Errors
/// Returns an error if the EPSG code is not supported or the transformation fails.
#[inline]
pub fn project_point(
    source_epsg: i32,
    target_epsg: i32,
    x: f64,
    y: f64,
) -> Result<(f64, f64), ProjectionError> {
    Reprojector::new(source_epsg, target_epsg)?.project(x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_crs_is_identity() {
        let reprojector = Reprojector::new(32632, 32632).unwrap();
        assert!(reprojector.is_identity());
        assert_eq!(reprojector.project(512_345.5, 5_400_000.25).unwrap(), (512_345.5, 5_400_000.25));
    }

    #[test]
    fn test_wgs84_to_utm_32n() {
        // Central meridian of zone 32 maps to the false easting
        let (x, y) = project_point(4326, 32632, 9.0, 50.0).unwrap();
        assert!((x - 500_000.0).abs() < 0.01, "easting: {x}");
        assert!(y > 5_500_000.0 && y < 5_600_000.0, "northing: {y}");
    }

    #[test]
    fn test_roundtrip_utm() {
        let (x, y) = project_point(4326, 32633, 15.0, 52.0).unwrap();
        let (lon, lat) = project_point(32633, 4326, x, y).unwrap();
        assert!((lon - 15.0).abs() < 1e-6, "lon roundtrip: {lon}");
        assert!((lat - 52.0).abs() < 1e-6, "lat roundtrip: {lat}");
    }

    #[test]
    fn test_prepared_matches_single_shot() {
        let reprojector = Reprojector::new(4326, 3035).unwrap();
        for (lon, lat) in [(10.0, 51.0), (13.4, 52.5), (8.7, 49.4)] {
            let batch = reprojector.project(lon, lat).unwrap();
            let single = project_point(4326, 3035, lon, lat).unwrap();
            assert_eq!(batch, single);
        }
    }

    #[test]
    fn test_unknown_epsg() {
        let err = Reprojector::new(4326, 999_999).unwrap_err();
        assert!(matches!(err, ProjectionError::UnknownEpsg(999_999)));
        assert!(err.to_string().contains("not in the crs-definitions database"));
    }

    #[test]
    fn test_is_geographic_crs() {
        assert!(is_geographic_crs(4326));
        assert!(is_geographic_crs(4258));
        assert!(!is_geographic_crs(3857));
        assert!(!is_geographic_crs(32632));
    }

    #[test]
    fn test_proj_strings_for_common_codes() {
        for code in [4326, 3035, 25832, 32632, 32633] {
            assert!(get_proj_string(code).is_some(), "EPSG:{code} should be supported");
        }
    }
}
