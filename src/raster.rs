//! In-memory raster dataset and the storage abstraction that reads and writes it.
//!
//! Every pipeline stage talks to rasters through [`RasterStore`]. A store call
//! opens the underlying file, consumes it fully and releases the handle before
//! returning, so no file handle outlives a single read or write.

use std::path::Path;

use thiserror::Error;

use crate::geometry::{BoundingBox, GeoTransform};

/// Errors raised while reading, writing or validating rasters.
#[derive(Debug, Error)]
pub enum RasterError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TIFF error on {path}: {source}")]
    Tiff {
        path: String,
        #[source]
        source: tiff::TiffError,
    },

    #[error("invalid metadata in {path}: {message}")]
    Metadata { path: String, message: String },

    #[error("invalid raster data: {0}")]
    InvalidData(String),

    #[error("unsupported raster layout in {path}: {message}")]
    Unsupported { path: String, message: String },
}

impl RasterError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn tiff(path: &Path, source: tiff::TiffError) -> Self {
        Self::Tiff {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn metadata(path: &Path, message: impl Into<String>) -> Self {
        Self::Metadata {
            path: path.display().to_string(),
            message: message.into(),
        }
    }
}

/// A georeferenced raster held fully in memory.
///
/// Pixels are stored band-sequential: band `b` occupies
/// `pixels[b * width * height .. (b + 1) * width * height]`, row-major within
/// the band. All bands share one transform, CRS and shape.
#[derive(Debug, Clone)]
pub struct RasterDataset {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub pixels: Vec<f32>,
    /// Per-band descriptive label, `None` when the band carries no description
    pub band_labels: Vec<Option<String>>,
    /// Nodata sentinel; `NaN` is a valid sentinel
    pub nodata: Option<f64>,
    /// EPSG code of the coordinate reference system, if known
    pub crs: Option<i32>,
    pub geo_transform: GeoTransform,
}

impl RasterDataset {
    /// Create a dataset, checking that the pixel buffer matches the declared shape.
    ///
    /// # Errors
    /// Returns [`RasterError::InvalidData`] when dimensions are zero or the
    /// buffer length is not `bands * width * height`.
    pub fn new(
        width: usize,
        height: usize,
        bands: usize,
        pixels: Vec<f32>,
        geo_transform: GeoTransform,
        crs: Option<i32>,
    ) -> Result<Self, RasterError> {
        if width == 0 || height == 0 || bands == 0 {
            return Err(RasterError::InvalidData(format!(
                "raster has zero dimensions ({width}x{height}, {bands} bands)"
            )));
        }
        let expected = width * height * bands;
        if pixels.len() != expected {
            return Err(RasterError::InvalidData(format!(
                "pixel buffer holds {} values, expected {expected}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            bands,
            pixels,
            band_labels: vec![None; bands],
            nodata: None,
            crs,
            geo_transform,
        })
    }

    #[must_use]
    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.nodata = nodata;
        self
    }

    /// Attach band labels, padded with `None` (or truncated) to `bands` entries.
    #[must_use]
    pub fn with_band_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        let mut labels: Vec<Option<String>> =
            labels.into_iter().map(|l| l.map(Into::into)).collect();
        labels.resize(self.bands, None);
        self.band_labels = labels;
        self
    }

    #[inline]
    #[must_use]
    pub fn band_len(&self) -> usize {
        self.width * self.height
    }

    /// Pixels of one band (0-based), row-major.
    #[inline]
    #[must_use]
    pub fn band(&self, band: usize) -> &[f32] {
        let len = self.band_len();
        &self.pixels[band * len..(band + 1) * len]
    }

    /// Value at `(band, col, row)`, `None` when out of range.
    #[inline]
    #[must_use]
    pub fn value(&self, band: usize, col: usize, row: usize) -> Option<f32> {
        if band >= self.bands || col >= self.width || row >= self.height {
            return None;
        }
        Some(self.pixels[band * self.band_len() + row * self.width + col])
    }

    /// Whether `value` equals the nodata sentinel. A `NaN` sentinel matches `NaN`.
    #[inline]
    #[must_use]
    pub fn is_nodata(&self, value: f32) -> bool {
        matches_sentinel(value, self.nodata)
    }

    /// Label of band `band`, if present.
    #[must_use]
    pub fn band_label(&self, band: usize) -> Option<&str> {
        self.band_labels.get(band).and_then(|l| l.as_deref())
    }

    /// World-space extent of the raster.
    #[must_use]
    pub fn bounds(&self) -> BoundingBox {
        #[allow(clippy::cast_precision_loss)]
        let corners = [
            self.geo_transform.pixel_to_world(0.0, 0.0),
            self.geo_transform.pixel_to_world(self.width as f64, 0.0),
            self.geo_transform.pixel_to_world(0.0, self.height as f64),
            self.geo_transform.pixel_to_world(self.width as f64, self.height as f64),
        ];
        let mut bbox = BoundingBox::new(corners[0].0, corners[0].1, corners[0].0, corners[0].1);
        for &(x, y) in &corners[1..] {
            bbox = bbox.union(&BoundingBox::new(x, y, x, y));
        }
        bbox
    }

    /// Replace every sentinel-matching value with `NaN`.
    ///
    /// Without a sentinel nothing is masked.
    pub fn mask_nodata_to_nan(&mut self) {
        let Some(nodata) = self.nodata else {
            return;
        };
        for v in &mut self.pixels {
            if matches_sentinel(*v, Some(nodata)) {
                *v = f32::NAN;
            }
        }
    }
}

/// `true` when `value` equals `sentinel`, treating a `NaN` sentinel as matching `NaN`.
#[inline]
#[must_use]
pub fn matches_sentinel(value: f32, sentinel: Option<f64>) -> bool {
    match sentinel {
        Some(s) if s.is_nan() => value.is_nan(),
        #[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
        Some(s) => value == s as f32,
        None => false,
    }
}

/// Read/write access to georeferenced rasters.
pub trait RasterStore {
    /// Read a raster with all of its bands.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or decoded.
    fn open(&self, path: &Path) -> Result<RasterDataset, RasterError>;

    /// Persist a raster, replacing any file at `path`.
    ///
    /// # Errors
    /// Returns an error if the raster cannot be encoded or written.
    fn write(&self, path: &Path, raster: &RasterDataset) -> Result<(), RasterError>;
}

/// In-memory [`RasterStore`] for stage tests.
#[cfg(test)]
pub(crate) mod memory {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    use super::{RasterDataset, RasterError, RasterStore};

    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub rasters: RefCell<HashMap<PathBuf, RasterDataset>>,
        /// Paths passed to `write`, in call order
        pub writes: RefCell<Vec<PathBuf>>,
    }

    impl MemoryStore {
        pub fn insert(&self, path: impl Into<PathBuf>, raster: RasterDataset) {
            self.rasters.borrow_mut().insert(path.into(), raster);
        }

        pub fn get(&self, path: impl AsRef<Path>) -> Option<RasterDataset> {
            self.rasters.borrow().get(path.as_ref()).cloned()
        }
    }

    impl RasterStore for MemoryStore {
        fn open(&self, path: &Path) -> Result<RasterDataset, RasterError> {
            self.get(path)
                .ok_or_else(|| RasterError::metadata(path, "no such raster"))
        }

        fn write(&self, path: &Path, raster: &RasterDataset) -> Result<(), RasterError> {
            self.insert(path, raster.clone());
            self.writes.borrow_mut().push(path.to_path_buf());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RasterDataset {
        RasterDataset::new(
            2,
            2,
            2,
            vec![1.0, 2.0, 3.0, -9999.0, 5.0, 6.0, 7.0, 8.0],
            GeoTransform::north_up(0.0, 20.0, 10.0, 10.0),
            Some(32632),
        )
        .unwrap()
        .with_nodata(Some(-9999.0))
    }

    #[test]
    fn test_shape_validation() {
        let err = RasterDataset::new(2, 2, 1, vec![0.0; 3], GeoTransform::default(), None);
        assert!(matches!(err, Err(RasterError::InvalidData(_))));
        let err = RasterDataset::new(0, 2, 1, vec![], GeoTransform::default(), None);
        assert!(err.is_err());
    }

    #[test]
    fn test_band_access() {
        let r = sample();
        assert_eq!(r.band(0), &[1.0, 2.0, 3.0, -9999.0]);
        assert_eq!(r.band(1), &[5.0, 6.0, 7.0, 8.0]);
        assert_eq!(r.value(1, 1, 0), Some(6.0));
        assert_eq!(r.value(2, 0, 0), None);
    }

    #[test]
    fn test_bounds() {
        let r = sample();
        assert_eq!(r.bounds(), BoundingBox::new(0.0, 0.0, 20.0, 20.0));
    }

    #[test]
    fn test_mask_nodata() {
        let mut r = sample();
        r.mask_nodata_to_nan();
        assert!(r.band(0)[3].is_nan());
        assert_eq!(r.band(0)[0], 1.0);
    }

    #[test]
    fn test_mask_without_sentinel_keeps_values() {
        let mut r = sample().with_nodata(None);
        r.mask_nodata_to_nan();
        assert_eq!(r.band(0)[3], -9999.0);
    }

    #[test]
    fn test_nan_sentinel_matches_nan() {
        assert!(matches_sentinel(f32::NAN, Some(f64::NAN)));
        assert!(!matches_sentinel(0.0, Some(f64::NAN)));
        assert!(!matches_sentinel(f32::NAN, Some(-9999.0)));
        assert!(!matches_sentinel(-9999.0, None));
    }

    #[test]
    fn test_band_labels_padded() {
        let r = sample().with_band_labels([Some("20180705_x")]);
        assert_eq!(r.band_label(0), Some("20180705_x"));
        assert_eq!(r.band_label(1), None);
        assert_eq!(r.band_labels.len(), 2);
    }
}
