//! Spatial mosaicking of per-tile composites.
//!
//! A [`MosaicGroup`] selects composites by two substring tokens. Every member
//! is masked, rescaled and merged onto the union of the members' extents with
//! a first-valid-wins rule, then written under a name that never overwrites
//! an earlier run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::band_date::BucketTable;
use crate::casting::{f64_to_pixel_offset, isize_to_usize};
use crate::config::PipelineConfig;
use crate::geometry::GeoTransform;
use crate::raster::{RasterDataset, RasterError, RasterStore};
use crate::source::{RasterCatalog, RasterEntry};

/// Named selection of composites to merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MosaicGroup {
    pub name: String,
    /// Token identifying the period, e.g. `"2018"`
    pub period_token: String,
    /// Token identifying the bucket, e.g. `"JulyMedian"`
    pub bucket_token: String,
}

impl MosaicGroup {
    pub fn new(
        name: impl Into<String>,
        period_token: impl Into<String>,
        bucket_token: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            period_token: period_token.into(),
            bucket_token: bucket_token.into(),
        }
    }

    /// `<Label>_<period>` groups for every period and bucket, periods outermost.
    #[must_use]
    pub fn cross(periods: &[&str], buckets: &BucketTable) -> Vec<Self> {
        periods
            .iter()
            .flat_map(|period| {
                buckets.buckets.iter().map(move |bucket| {
                    Self::new(
                        format!("{}_{period}", bucket.label),
                        *period,
                        format!("{}Median", bucket.label),
                    )
                })
            })
            .collect()
    }

    /// Whether a composite file name belongs to this group.
    #[must_use]
    pub fn matches(&self, file_name: &str) -> bool {
        file_name.contains(&self.period_token) && file_name.contains(&self.bucket_token)
    }

    /// Members of this group in catalog order.
    pub fn select<'c, C: RasterCatalog + ?Sized>(&self, catalog: &'c C) -> Vec<&'c RasterEntry> {
        catalog
            .entries()
            .iter()
            .filter(|e| self.matches(&e.file_name()))
            .collect()
    }
}

/// `dir/file_name`, or the first `dir/<stem>_<n>.<ext>` (n = 1, 2, ...) that does not exist.
#[must_use]
pub fn unique_output_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let name = Path::new(file_name);
    let stem = name
        .file_stem()
        .map_or_else(|| file_name.to_string(), |s| s.to_string_lossy().into_owned());
    let ext = name.extension().map(|e| e.to_string_lossy().into_owned());
    (1_u64..)
        .map(|i| match &ext {
            Some(ext) => dir.join(format!("{stem}_{i}.{ext}")),
            None => dir.join(format!("{stem}_{i}")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// First band of `raster` with sentinel values set to NaN, then divided by `scale_factor`.
///
/// # Errors
/// Returns an error if the single-band result cannot be constructed.
pub fn rescale(raster: &RasterDataset, scale_factor: f64) -> Result<RasterDataset, RasterError> {
    let pixels: Vec<f32> = raster
        .band(0)
        .iter()
        .map(|&v| {
            if raster.is_nodata(v) || v.is_nan() {
                f32::NAN
            } else {
                #[allow(clippy::cast_possible_truncation)]
                let scaled = (f64::from(v) / scale_factor) as f32;
                scaled
            }
        })
        .collect();
    Ok(RasterDataset::new(
        raster.width,
        raster.height,
        1,
        pixels,
        raster.geo_transform,
        raster.crs,
    )?
    .with_nodata(Some(f64::NAN)))
}

fn same_pixel_size(a: (f64, f64), b: (f64, f64)) -> bool {
    let close = |x: f64, y: f64| (x - y).abs() <= 1e-9 * x.abs().max(1.0);
    close(a.0, b.0) && close(a.1, b.1)
}

/// Merge single-band rasters onto the union of their extents.
///
/// Each output pixel takes the first non-NaN member value in input order.
/// Members must be north-up, share the first member's pixel size, and have
/// origins on a common grid (offsets are rounded to whole pixels). Pixels no
/// member covers are set to `nodata`.
///
/// # Errors
/// Returns [`RasterError::InvalidData`] for an empty input or incompatible members.
pub fn merge_first_valid(members: &[RasterDataset], nodata: f64) -> Result<RasterDataset, RasterError> {
    let Some(first) = members.first() else {
        return Err(RasterError::InvalidData("nothing to merge".to_string()));
    };
    let (pixel_width, pixel_height) = first.geo_transform.pixel_size();
    for member in members {
        if !member.geo_transform.is_north_up() {
            return Err(RasterError::InvalidData("rotated rasters cannot be merged".to_string()));
        }
        if !same_pixel_size(member.geo_transform.pixel_size(), (pixel_width, pixel_height)) {
            return Err(RasterError::InvalidData(format!(
                "pixel size {:?} differs from {:?}",
                member.geo_transform.pixel_size(),
                (pixel_width, pixel_height)
            )));
        }
    }

    let bounds = members
        .iter()
        .skip(1)
        .fold(first.bounds(), |acc, m| acc.union(&m.bounds()));
    let width = isize_to_usize(f64_to_pixel_offset(bounds.width() / pixel_width))
        .filter(|&w| w > 0)
        .ok_or_else(|| RasterError::InvalidData("empty mosaic extent".to_string()))?;
    let height = isize_to_usize(f64_to_pixel_offset(bounds.height() / pixel_height))
        .filter(|&h| h > 0)
        .ok_or_else(|| RasterError::InvalidData("empty mosaic extent".to_string()))?;

    let mut pixels = vec![f32::NAN; width * height];
    for member in members {
        let (origin_x, origin_y) = member.geo_transform.origin();
        let col_offset = f64_to_pixel_offset((origin_x - bounds.minx) / pixel_width);
        let row_offset = f64_to_pixel_offset((bounds.maxy - origin_y) / pixel_height);
        let band = member.band(0);
        for row in 0..member.height {
            let Some(out_row) = row_offset
                .checked_add_unsigned(row)
                .and_then(isize_to_usize)
                .filter(|&r| r < height)
            else {
                continue;
            };
            for col in 0..member.width {
                let Some(out_col) = col_offset
                    .checked_add_unsigned(col)
                    .and_then(isize_to_usize)
                    .filter(|&c| c < width)
                else {
                    continue;
                };
                let out = &mut pixels[out_row * width + out_col];
                let value = band[row * member.width + col];
                if out.is_nan() && !value.is_nan() {
                    *out = value;
                }
            }
        }
    }

    if !nodata.is_nan() {
        #[allow(clippy::cast_possible_truncation)]
        let fill = nodata as f32;
        for v in pixels.iter_mut().filter(|v| v.is_nan()) {
            *v = fill;
        }
    }

    let transform = GeoTransform::north_up(bounds.minx, bounds.maxy, pixel_width, pixel_height);
    Ok(RasterDataset::new(width, height, 1, pixels, transform, first.crs)?.with_nodata(Some(nodata)))
}

/// Outcome of a mosaicking run.
#[derive(Debug, Clone, Default)]
pub struct MosaicReport {
    /// (group name, output path) per mosaic written
    pub written: Vec<(String, PathBuf)>,
    /// Groups with no usable member
    pub skipped_groups: Vec<String>,
    /// Members excluded because they could not be opened or aligned
    pub skipped_members: Vec<PathBuf>,
}

/// Builds one mosaic per configured group.
pub struct MosaicBuilder<'a, S: RasterStore> {
    store: &'a S,
    config: &'a PipelineConfig,
}

impl<'a, S: RasterStore> MosaicBuilder<'a, S> {
    pub fn new(store: &'a S, config: &'a PipelineConfig) -> Self {
        Self { store, config }
    }

    /// Open, mask and rescale every member, dropping those that fail or do not align.
    fn load_members(
        &self,
        group: &MosaicGroup,
        entries: &[&RasterEntry],
        report: &mut MosaicReport,
    ) -> Vec<RasterDataset> {
        let mut loaded: Vec<RasterDataset> = Vec::with_capacity(entries.len());
        for entry in entries {
            debug!(group = %group.name, path = %entry.path.display(), "Reading member");
            let member = match self
                .store
                .open(&entry.path)
                .and_then(|r| rescale(&r, self.config.scale_factor))
            {
                Ok(member) => member,
                Err(e) => {
                    warn!(group = %group.name, path = %entry.path.display(), error = %e, "Skipping unreadable member");
                    report.skipped_members.push(entry.path.clone());
                    continue;
                }
            };

            if let Some(reference) = loaded.first() {
                let aligned = member.crs == reference.crs
                    && member.geo_transform.is_north_up()
                    && same_pixel_size(member.geo_transform.pixel_size(), reference.geo_transform.pixel_size());
                if !aligned {
                    warn!(
                        group = %group.name,
                        path = %entry.path.display(),
                        crs = ?member.crs,
                        pixel_size = ?member.geo_transform.pixel_size(),
                        "Skipping member not on the reference grid"
                    );
                    report.skipped_members.push(entry.path.clone());
                    continue;
                }
            } else if !member.geo_transform.is_north_up() {
                warn!(group = %group.name, path = %entry.path.display(), "Skipping rotated member");
                report.skipped_members.push(entry.path.clone());
                continue;
            }
            loaded.push(member);
        }
        loaded
    }

    /// Build and write one group's mosaic. `Ok(None)` when the group has no usable member.
    ///
    /// # Errors
    /// Returns an error if the merged raster cannot be written.
    pub fn build_group<C: RasterCatalog + ?Sized>(
        &self,
        catalog: &C,
        group: &MosaicGroup,
        report: &mut MosaicReport,
    ) -> Result<Option<PathBuf>, RasterError> {
        let entries = group.select(catalog);
        info!(group = %group.name, matched = entries.len(), "Processing group");
        if entries.is_empty() {
            info!(group = %group.name, "No composites matched, skipping");
            report.skipped_groups.push(group.name.clone());
            return Ok(None);
        }

        let members = self.load_members(group, &entries, report);
        if members.is_empty() {
            warn!(group = %group.name, "No readable members, skipping");
            report.skipped_groups.push(group.name.clone());
            return Ok(None);
        }

        let mosaic = merge_first_valid(&members, self.config.mosaic_nodata())?
            .with_band_labels([Some(group.name.as_str())]);
        let path = unique_output_path(&self.config.mosaic_dir, &format!("{}_mosaic.tif", group.name));
        self.store.write(&path, &mosaic)?;
        info!(
            group = %group.name,
            members = members.len(),
            width = mosaic.width,
            height = mosaic.height,
            path = %path.display(),
            "Wrote mosaic"
        );
        report.written.push((group.name.clone(), path.clone()));
        Ok(Some(path))
    }

    /// Build every configured group in declaration order.
    ///
    /// # Errors
    /// Returns an error if a mosaic cannot be written.
    pub fn run<C: RasterCatalog + ?Sized>(&self, catalog: &C) -> Result<MosaicReport, RasterError> {
        let mut report = MosaicReport::default();
        for group in &self.config.groups {
            self.build_group(catalog, group, &mut report)?;
        }
        info!(
            written = report.written.len(),
            skipped_groups = report.skipped_groups.len(),
            "Mosaicking finished"
        );
        Ok(report)
    }
}
