//! Pixel sampling at world coordinates.
//!
//! This module provides the [`PointQuery`] trait for reading every band of a
//! [`RasterDataset`] at a coordinate in the raster's own CRS. Callers holding
//! points in another CRS reproject them first (see
//! [`PointLayer::to_crs`](crate::PointLayer::to_crs)).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use geocomposite::{GeoTiffStore, PointQuery, RasterStore};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let raster = GeoTiffStore::default().open(Path::new("July_2018_mosaic.tif"))?;
//!
//!     let result = raster.sample_xy(551_000.0, 4_185_000.0);
//!     println!("in extent: {}, values: {:?}", result.is_valid, result.values);
//!     Ok(())
//! }
//! ```

use crate::casting::f64_to_pixel_index;
use crate::raster::RasterDataset;

/// Values of every band at one coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct PointQueryResult {
    /// One value per band, in band order. Outside the extent every band holds
    /// the fill value: the nodata sentinel, or `0.0` without one.
    pub values: Vec<f32>,

    /// Whether the coordinate fell inside the raster
    pub is_valid: bool,
}

/// Trait for point queries at world coordinates.
pub trait PointQuery {
    /// Pixel `(col, row)` containing a coordinate in the raster's CRS.
    fn pixel_at(&self, x: f64, y: f64) -> Option<(usize, usize)>;

    /// Sample all bands at a coordinate in the raster's CRS.
    fn sample_xy(&self, x: f64, y: f64) -> PointQueryResult;
}

impl PointQuery for RasterDataset {
    fn pixel_at(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let (px, py) = self.geo_transform.world_to_pixel(x, y)?;
        Some((f64_to_pixel_index(px, self.width)?, f64_to_pixel_index(py, self.height)?))
    }

    fn sample_xy(&self, x: f64, y: f64) -> PointQueryResult {
        let Some((col, row)) = self.pixel_at(x, y) else {
            #[allow(clippy::cast_possible_truncation)]
            let fill = self.nodata.map_or(0.0, |n| n as f32);
            return PointQueryResult {
                values: vec![fill; self.bands],
                is_valid: false,
            };
        };

        let values = (0..self.bands)
            .map(|band| self.value(band, col, row).unwrap_or(f32::NAN))
            .collect();
        PointQueryResult {
            values,
            is_valid: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeoTransform;

    fn raster() -> RasterDataset {
        // 3x2 pixels of 10 m, upper-left at (500000, 20)
        RasterDataset::new(
            3,
            2,
            2,
            vec![
                1.0, 2.0, 3.0, 4.0, 5.0, 6.0, // band 0
                10.0, 20.0, 30.0, 40.0, 50.0, 60.0, // band 1
            ],
            GeoTransform::north_up(500_000.0, 20.0, 10.0, 10.0),
            Some(32632),
        )
        .unwrap()
    }

    #[test]
    fn test_pixel_at() {
        let r = raster();
        assert_eq!(r.pixel_at(500_000.0, 20.0), Some((0, 0)));
        assert_eq!(r.pixel_at(500_025.0, 5.0), Some((2, 1)));
        assert_eq!(r.pixel_at(500_030.0, 5.0), None);
        assert_eq!(r.pixel_at(499_999.0, 5.0), None);
    }

    #[test]
    fn test_sample_xy() {
        let result = raster().sample_xy(500_015.0, 5.0);
        assert!(result.is_valid);
        assert_eq!(result.values, vec![5.0, 50.0]);
    }

    #[test]
    fn test_outside_extent_uses_fill() {
        let result = raster().sample_xy(0.0, 0.0);
        assert!(!result.is_valid);
        assert_eq!(result.values, vec![0.0, 0.0]);

        let result = raster().with_nodata(Some(-9999.0)).sample_xy(0.0, 0.0);
        assert_eq!(result.values, vec![-9999.0, -9999.0]);
    }
}
