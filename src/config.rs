//! Pipeline configuration.
//!
//! One explicit structure carries every option the stages read. It is
//! deserialised from JSON; omitted fields fall back to [`PipelineConfig::default`],
//! which reproduces the July/August 2017–2018 NDVI workflow.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::band_date::BucketTable;
use crate::geotiff_writer::GeoTiffCompression;
use crate::mosaic::MosaicGroup;

/// Reflectance-style integer scaling applied before mosaicking.
pub const DEFAULT_SCALE_FACTOR: f64 = 10_000.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root holding one directory per tile with multi-band stacks inside
    pub input_root: PathBuf,
    /// Only stacks whose file name contains this token are composited
    pub product_token: Option<String>,
    /// Flat output folder for per-tile composites
    pub composite_dir: PathBuf,
    /// Output folder for mosaics
    pub mosaic_dir: PathBuf,
    /// Delimited-text output of the point sampler
    pub extract_csv: PathBuf,
    pub buckets: BucketTable,
    /// Mosaic inputs are divided by this after nodata masking
    pub scale_factor: f64,
    /// Sentinel written for missing mosaic pixels; `None` writes NaN
    pub mosaic_nodata: Option<f64>,
    /// Mosaic groups, processed in declaration order
    pub groups: Vec<MosaicGroup>,
    pub compression: GeoTiffCompression,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let buckets = BucketTable::default();
        let groups = MosaicGroup::cross(&["2017", "2018"], &buckets);
        Self {
            input_root: PathBuf::from("data/tiles"),
            product_token: Some("NDV".to_string()),
            composite_dir: PathBuf::from("data/composites"),
            mosaic_dir: PathBuf::from("data/composites/mosaics"),
            extract_csv: PathBuf::from("data/point_raster_extracts.csv"),
            buckets,
            scale_factor: DEFAULT_SCALE_FACTOR,
            mosaic_nodata: None,
            groups,
            compression: GeoTiffCompression::default(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a JSON configuration file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or fails [`validate`](Self::validate).
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Sentinel for mosaic outputs.
    #[must_use]
    pub fn mosaic_nodata(&self) -> f64 {
        self.mosaic_nodata.unwrap_or(f64::NAN)
    }

    /// Check the options that would make a run meaningless.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.scale_factor.is_finite() || self.scale_factor == 0.0 {
            return Err(ConfigError::Invalid(format!(
                "scale_factor must be finite and non-zero, got {}",
                self.scale_factor
            )));
        }
        if self.buckets.is_empty() {
            return Err(ConfigError::Invalid("bucket table is empty".to_string()));
        }

        let mut keys = HashSet::new();
        for bucket in &self.buckets.buckets {
            if bucket.label.is_empty() {
                return Err(ConfigError::Invalid(format!("bucket {:?} has an empty label", bucket.key)));
            }
            if !keys.insert(bucket.key.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate bucket key {:?}", bucket.key)));
            }
        }

        let mut names = HashSet::new();
        for group in &self.groups {
            if group.period_token.is_empty() || group.bucket_token.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "group {:?} needs both a period and a bucket token",
                    group.name
                )));
            }
            if !names.insert(group.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate group name {:?}", group.name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band_date::{Bucket, PeriodUnit};

    #[test]
    fn test_default_is_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.scale_factor, 10_000.0);
        assert!(config.mosaic_nodata().is_nan());
        let names: Vec<&str> = config.groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["July_2017", "August_2017", "July_2018", "August_2018"]);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "input_root": "/data/force",
                "scale_factor": 1000,
                "mosaic_nodata": -9999,
                "buckets": {"unit": "month", "buckets": [{"key": "06", "label": "June"}]},
                "groups": [{"name": "June_2022", "period_token": "2022", "bucket_token": "JuneMedian"}],
                "compression": "lzw"
            }"#,
        )
        .unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.input_root, PathBuf::from("/data/force"));
        assert_eq!(config.scale_factor, 1000.0);
        assert_eq!(config.mosaic_nodata(), -9999.0);
        assert_eq!(config.buckets.buckets, vec![Bucket::new("06", "June")]);
        assert_eq!(config.groups.len(), 1);
        assert_eq!(config.compression, GeoTiffCompression::Lzw);
        assert_eq!(config.product_token.as_deref(), Some("NDV"));
    }

    #[test]
    fn test_rejects_zero_scale() {
        let config = PipelineConfig {
            scale_factor: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_duplicate_groups_and_keys() {
        let mut config = PipelineConfig::default();
        config.groups.push(config.groups[0].clone());
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            buckets: BucketTable::new(
                PeriodUnit::Month,
                vec![Bucket::new("07", "July"), Bucket::new("07", "Juli")],
            ),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_and_malformed_files() {
        assert!(matches!(
            PipelineConfig::from_json_file("/nonexistent/config.json"),
            Err(ConfigError::Io { .. })
        ));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            PipelineConfig::from_json_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
