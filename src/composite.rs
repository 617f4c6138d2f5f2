//! Per-tile temporal compositing.
//!
//! Each input stack is reduced to one single-band raster per recognised
//! bucket by taking the per-pixel median across the bucket's bands, ignoring
//! missing values.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::band_date::{Bucket, DateConvention, YyyymmddPrefix};
use crate::config::PipelineConfig;
use crate::raster::{matches_sentinel, RasterDataset, RasterError, RasterStore};
use crate::source::RasterEntry;

/// Median of the non-NaN values, `None` when every value is NaN.
///
/// The slice is reordered in place. An even count averages the middle pair;
/// the arithmetic is done in `f64`.
#[must_use]
pub fn nan_median(values: &mut [f32]) -> Option<f32> {
    let mut valid = 0;
    for i in 0..values.len() {
        if !values[i].is_nan() {
            values.swap(valid, i);
            valid += 1;
        }
    }
    if valid == 0 {
        return None;
    }

    let valid = &mut values[..valid];
    valid.sort_unstable_by(f32::total_cmp);
    let mid = valid.len() / 2;
    let median = if valid.len() % 2 == 0 {
        (f64::from(valid[mid - 1]) + f64::from(valid[mid])) / 2.0
    } else {
        f64::from(valid[mid])
    };
    #[allow(clippy::cast_possible_truncation)]
    Some(median as f32)
}

/// One composite raster written to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeOutput {
    pub tile: String,
    pub source: PathBuf,
    pub bucket: Bucket,
    pub path: PathBuf,
}

/// Outcome of a compositing run.
#[derive(Debug, Clone, Default)]
pub struct CompositeReport {
    pub written: Vec<CompositeOutput>,
    /// Rasters that could not be opened
    pub skipped_rasters: Vec<PathBuf>,
    /// (raster, bucket label) pairs with no contributing band
    pub skipped_buckets: Vec<(PathBuf, String)>,
}

/// Reduces multi-date stacks to per-bucket median rasters.
pub struct Compositor<'a, S: RasterStore> {
    store: &'a S,
    config: &'a PipelineConfig,
    convention: Box<dyn DateConvention + 'a>,
}

impl<'a, S: RasterStore> Compositor<'a, S> {
    pub fn new(store: &'a S, config: &'a PipelineConfig) -> Self {
        Self {
            store,
            config,
            convention: Box::new(YyyymmddPrefix),
        }
    }

    /// Use a different band label grammar.
    #[must_use]
    pub fn with_convention(mut self, convention: impl DateConvention + 'a) -> Self {
        self.convention = Box::new(convention);
        self
    }

    /// Composite path for one source stack and bucket. Stacks outside a tile
    /// folder get no tile prefix.
    #[must_use]
    pub fn output_path(&self, tile: &str, source: &Path, bucket: &Bucket) -> PathBuf {
        let stem = source
            .file_stem()
            .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
        let name = if tile.is_empty() {
            format!("{stem}_{}Median.tif", bucket.label)
        } else {
            format!("{tile}_{stem}_{}Median.tif", bucket.label)
        };
        self.config.composite_dir.join(name)
    }

    /// Median rasters for every bucket of the table, in table order.
    ///
    /// A bucket with no contributing band yields `None`.
    ///
    /// # Errors
    /// Returns an error if an output raster cannot be constructed.
    pub fn composite(
        &self,
        raster: &RasterDataset,
    ) -> Result<Vec<(&'a Bucket, Option<RasterDataset>)>, RasterError> {
        let groups = self
            .config
            .buckets
            .band_indices(self.convention.as_ref(), &raster.band_labels);

        let mut results = Vec::with_capacity(groups.len());
        for (bucket, indices) in groups {
            if indices.is_empty() {
                results.push((bucket, None));
                continue;
            }
            let pixels = median_across(raster, &indices);
            let output = RasterDataset::new(
                raster.width,
                raster.height,
                1,
                pixels,
                raster.geo_transform,
                raster.crs,
            )?
            .with_nodata(raster.nodata)
            .with_band_labels([Some(format!("{}Median", bucket.label))]);
            results.push((bucket, Some(output)));
        }
        Ok(results)
    }

    /// Open one stack, composite it and write every non-empty bucket.
    ///
    /// # Errors
    /// Returns an error if the stack cannot be opened or an output cannot be written.
    pub fn composite_raster(&self, tile: &str, path: &Path) -> Result<Vec<CompositeOutput>, RasterError> {
        let raster = self.store.open(path)?;
        let mut report = CompositeReport::default();
        self.write_composites(tile, path, &raster, &mut report)?;
        Ok(report.written)
    }

    /// Composite every entry in order.
    ///
    /// Stacks that fail to open are logged and skipped; a failed write aborts the run.
    ///
    /// # Errors
    /// Returns an error if an output raster cannot be written.
    pub fn run(&self, entries: &[RasterEntry]) -> Result<CompositeReport, RasterError> {
        let mut report = CompositeReport::default();
        for entry in entries {
            let tile = entry.tile.as_deref().unwrap_or("");
            info!(tile, raster = %entry.name, "Compositing");

            let raster = match self.store.open(&entry.path) {
                Ok(raster) => raster,
                Err(e) => {
                    warn!(tile, path = %entry.path.display(), error = %e, "Skipping unreadable raster");
                    report.skipped_rasters.push(entry.path.clone());
                    continue;
                }
            };
            if raster.nodata.is_none() {
                debug!(path = %entry.path.display(), "No nodata sentinel, every pixel treated as valid");
            }
            self.write_composites(tile, &entry.path, &raster, &mut report)?;
        }
        info!(
            written = report.written.len(),
            skipped_rasters = report.skipped_rasters.len(),
            skipped_buckets = report.skipped_buckets.len(),
            "Compositing finished"
        );
        Ok(report)
    }

    fn write_composites(
        &self,
        tile: &str,
        source: &Path,
        raster: &RasterDataset,
        report: &mut CompositeReport,
    ) -> Result<(), RasterError> {
        for (bucket, composite) in self.composite(raster)? {
            let Some(composite) = composite else {
                info!(tile, raster = %source.display(), bucket = %bucket.label, "No bands in bucket, skipping");
                report
                    .skipped_buckets
                    .push((source.to_path_buf(), bucket.label.clone()));
                continue;
            };
            let path = self.output_path(tile, source, bucket);
            self.store.write(&path, &composite)?;
            info!(tile, bucket = %bucket.label, path = %path.display(), "Saved median composite");
            report.written.push(CompositeOutput {
                tile: tile.to_string(),
                source: source.to_path_buf(),
                bucket: bucket.clone(),
                path,
            });
        }
        Ok(())
    }
}

/// Per-pixel NaN-ignoring median of the selected bands.
///
/// Sentinel-matching inputs count as missing; all-missing pixels are written
/// back as the sentinel when one is set, NaN otherwise.
fn median_across(raster: &RasterDataset, indices: &[usize]) -> Vec<f32> {
    #[allow(clippy::cast_possible_truncation)]
    let fill = raster.nodata.map_or(f32::NAN, |n| n as f32);
    let mut scratch = Vec::with_capacity(indices.len());
    let mut out = Vec::with_capacity(raster.band_len());
    for pixel in 0..raster.band_len() {
        scratch.clear();
        for &band in indices {
            let v = raster.band(band)[pixel];
            scratch.push(if matches_sentinel(v, raster.nodata) { f32::NAN } else { v });
        }
        out.push(nan_median(&mut scratch).unwrap_or(fill));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeoTransform;
    use crate::raster::memory::MemoryStore;

    fn stack() -> RasterDataset {
        // 2x1 pixels, 3 bands
        RasterDataset::new(
            2,
            1,
            3,
            vec![1000.0, -9999.0, 2000.0, -9999.0, -9999.0, -9999.0],
            GeoTransform::north_up(500_000.0, 5_000_000.0, 10.0, 10.0),
            Some(32632),
        )
        .unwrap()
        .with_nodata(Some(-9999.0))
        .with_band_labels([Some("20180705_x"), Some("20180714_x"), Some("20180822_x")])
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            composite_dir: PathBuf::from("/out"),
            ..Default::default()
        }
    }

    #[test]
    fn test_nan_median() {
        assert_eq!(nan_median(&mut [2.0, 4.0, f32::NAN, 6.0]), Some(4.0));
        assert_eq!(nan_median(&mut [2.0, 4.0, 6.0]), Some(4.0));
        assert_eq!(nan_median(&mut [1000.0, 2000.0]), Some(1500.0));
        assert_eq!(nan_median(&mut [f32::NAN, 7.0]), Some(7.0));
        assert_eq!(nan_median(&mut [f32::NAN, f32::NAN]), None);
        assert_eq!(nan_median(&mut []), None);
    }

    #[test]
    fn test_composite_buckets() {
        let store = MemoryStore::default();
        let config = config();
        let compositor = Compositor::new(&store, &config);
        let results = compositor.composite(&stack()).unwrap();

        assert_eq!(results.len(), 2);
        let (july, Some(july_raster)) = &results[0] else {
            panic!("july composite missing")
        };
        assert_eq!(july.label, "July");
        assert_eq!(july_raster.bands, 1);
        // (1000, 2000) -> 1500; (-9999, -9999) -> nodata
        assert_eq!(july_raster.band(0), &[1500.0, -9999.0]);
        assert_eq!(july_raster.nodata, Some(-9999.0));
        assert_eq!(july_raster.crs, Some(32632));
        assert_eq!(july_raster.geo_transform, stack().geo_transform);

        let (_, Some(august)) = &results[1] else {
            panic!("august composite missing")
        };
        assert_eq!(august.band(0), &[-9999.0, -9999.0]);
    }

    #[test]
    fn test_missing_sentinel_keeps_values_and_nan() {
        let raster = RasterDataset::new(
            1,
            1,
            2,
            vec![f32::NAN, -9999.0],
            GeoTransform::default(),
            None,
        )
        .unwrap()
        .with_band_labels([Some("20170701_a"), Some("20170702_b")]);
        let store = MemoryStore::default();
        let config = config();
        let results = Compositor::new(&store, &config).composite(&raster).unwrap();
        let (_, Some(july)) = &results[0] else { panic!() };
        // Without a sentinel -9999 is ordinary data
        assert_eq!(july.band(0), &[-9999.0]);
        assert!(results[1].1.is_none());
    }

    #[test]
    fn test_all_missing_without_sentinel_is_nan() {
        let raster = RasterDataset::new(1, 1, 1, vec![f32::NAN], GeoTransform::default(), None)
            .unwrap()
            .with_band_labels([Some("20170701_a")]);
        let store = MemoryStore::default();
        let config = config();
        let results = Compositor::new(&store, &config).composite(&raster).unwrap();
        let (_, Some(july)) = &results[0] else { panic!() };
        assert!(july.band(0)[0].is_nan());
    }

    #[test]
    fn test_run_skips_unreadable_and_empty_buckets() {
        let store = MemoryStore::default();
        let good = PathBuf::from("/in/X0001_Y0001/2018_NDV.tif");
        let only_july = stack().with_band_labels([Some("20180705_x"), Some("garbage"), None]);
        store.insert(good.clone(), only_july);

        let entries = vec![
            RasterEntry {
                name: "missing_NDV".to_string(),
                tile: Some("X0000_Y0000".to_string()),
                path: PathBuf::from("/in/X0000_Y0000/missing_NDV.tif"),
            },
            RasterEntry {
                name: "2018_NDV".to_string(),
                tile: Some("X0001_Y0001".to_string()),
                path: good.clone(),
            },
        ];

        let config = config();
        let report = Compositor::new(&store, &config).run(&entries).unwrap();
        assert_eq!(report.skipped_rasters.len(), 1);
        assert_eq!(report.skipped_buckets, vec![(good, "August".to_string())]);
        assert_eq!(report.written.len(), 1);
        assert_eq!(
            report.written[0].path,
            PathBuf::from("/out/X0001_Y0001_2018_NDV_JulyMedian.tif")
        );

        assert_eq!(store.writes.borrow().len(), 1);
        let written = store.get("/out/X0001_Y0001_2018_NDV_JulyMedian.tif").unwrap();
        assert_eq!(written.band(0), &[1000.0, -9999.0]);
    }

    #[test]
    fn test_composite_raster_writes_every_bucket() {
        let store = MemoryStore::default();
        let source = PathBuf::from("/in/X0001_Y0001/2018_NDV.tif");
        store.insert(source.clone(), stack());
        let config = config();

        let outputs = Compositor::new(&store, &config)
            .composite_raster("X0001_Y0001", &source)
            .unwrap();

        let july_path = PathBuf::from("/out/X0001_Y0001_2018_NDV_JulyMedian.tif");
        let august_path = PathBuf::from("/out/X0001_Y0001_2018_NDV_AugustMedian.tif");
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].tile, "X0001_Y0001");
        assert_eq!(outputs[0].source, source);
        assert_eq!(outputs[0].bucket.label, "July");
        assert_eq!(outputs[0].path, july_path);
        assert_eq!(outputs[1].bucket.label, "August");
        assert_eq!(outputs[1].path, august_path);

        assert_eq!(*store.writes.borrow(), vec![july_path.clone(), august_path]);
        assert_eq!(store.get(&july_path).unwrap().band(0), &[1500.0, -9999.0]);

        let missing = Compositor::new(&store, &config)
            .composite_raster("X0001_Y0001", Path::new("/in/absent.tif"));
        assert!(missing.is_err());
    }

    #[test]
    fn test_output_path_without_tile() {
        let store = MemoryStore::default();
        let config = config();
        let compositor = Compositor::new(&store, &config);
        let july = Bucket::new("07", "July");
        assert_eq!(
            compositor.output_path("", Path::new("/in/2018_NDV.tif"), &july),
            PathBuf::from("/out/2018_NDV_JulyMedian.tif")
        );
        assert_eq!(
            compositor.output_path("X0001_Y0001", Path::new("/in/2018_NDV.tif"), &july),
            PathBuf::from("/out/X0001_Y0001_2018_NDV_JulyMedian.tif")
        );
    }

    #[test]
    fn test_custom_convention() {
        struct MonthFirst;
        impl DateConvention for MonthFirst {
            fn parse(&self, label: &str) -> Option<chrono::NaiveDate> {
                let month: u32 = label.get(..2)?.parse().ok()?;
                chrono::NaiveDate::from_ymd_opt(2020, month, 1)
            }
        }
        let raster = RasterDataset::new(1, 1, 1, vec![3.0], GeoTransform::default(), None)
            .unwrap()
            .with_band_labels([Some("08-foo")]);
        let store = MemoryStore::default();
        let config = config();
        let results = Compositor::new(&store, &config)
            .with_convention(MonthFirst)
            .composite(&raster)
            .unwrap();
        assert!(results[0].1.is_none());
        assert_eq!(results[1].1.as_ref().unwrap().band(0), &[3.0]);
    }
}
