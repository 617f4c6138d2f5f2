//! Point sampling across a raster stack.
//!
//! Unlike compositing and mosaicking, sampling is strict: every stack member
//! must open, since each output row carries one column per intended raster.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::point_layer::{PointLayer, PointLayerError};
use crate::point_query::PointQuery;
use crate::raster::{RasterDataset, RasterError, RasterStore};

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("cannot open stack raster {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: RasterError,
    },

    #[error("raster stack is empty")]
    EmptyStack,

    #[error(transparent)]
    PointLayer(#[from] PointLayerError),

    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV output failed: {0}")]
    Csv(#[from] csv::Error),
}

/// A raster and the name its columns are derived from.
#[derive(Debug, Clone)]
pub struct StackMember {
    pub name: String,
    pub raster: RasterDataset,
}

impl StackMember {
    /// `<name>` for a single-band raster, `<name>_band<k>` (1-based) otherwise.
    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        if self.raster.bands == 1 {
            vec![self.name.clone()]
        } else {
            (1..=self.raster.bands)
                .map(|k| format!("{}_band{k}", self.name))
                .collect()
        }
    }
}

/// Ordered rasters sampled together.
#[derive(Debug, Clone, Default)]
pub struct RasterStack {
    members: Vec<StackMember>,
}

impl RasterStack {
    /// Open every path, naming each member by its file name.
    ///
    /// # Errors
    /// Returns [`SampleError::Open`] for the first raster that cannot be read.
    pub fn open<S, P>(store: &S, paths: &[P]) -> Result<Self, SampleError>
    where
        S: RasterStore + ?Sized,
        P: AsRef<Path>,
    {
        let mut members = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            debug!(path = %path.display(), "Loading stack raster");
            let raster = store.open(path).map_err(|source| SampleError::Open {
                path: path.to_path_buf(),
                source,
            })?;
            let name = path
                .file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
            members.push(StackMember { name, raster });
        }
        Ok(Self::from_members(members))
    }

    #[must_use]
    pub fn from_members(members: Vec<StackMember>) -> Self {
        if let Some(first) = members.first() {
            for member in &members[1..] {
                if member.raster.crs != first.raster.crs {
                    warn!(
                        raster = %member.name,
                        crs = ?member.raster.crs,
                        stack_crs = ?first.raster.crs,
                        "Stack raster CRS differs from the first raster; points are not reprojected for it"
                    );
                }
            }
        }
        Self { members }
    }

    #[must_use]
    pub fn members(&self) -> &[StackMember] {
        &self.members
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// CRS every lookup is made in: the first member's.
    #[must_use]
    pub fn crs(&self) -> Option<i32> {
        self.members.first().and_then(|m| m.raster.crs)
    }

    /// Sampled column names in stack order.
    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        self.members.iter().flat_map(StackMember::columns).collect()
    }
}

/// One retained point: its attributes followed by its sampled values.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRow {
    pub attributes: Vec<Value>,
    pub values: Vec<f32>,
}

/// Attribute columns first, sampled columns after, one row per point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleTable {
    pub columns: Vec<String>,
    pub rows: Vec<SampleRow>,
}

impl SampleTable {
    /// Write as comma-separated text with a header row, creating parent directories.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), SampleError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| SampleError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = std::fs::File::create(path).map_err(|source| SampleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.write_csv_to(file)?;
        info!(path = %path.display(), rows = self.rows.len(), columns = self.columns.len(), "Wrote extract table");
        Ok(())
    }

    /// Write as comma-separated text to any writer.
    ///
    /// Missing attributes and NaN samples become empty fields.
    ///
    /// # Errors
    /// Returns an error if a record cannot be written.
    pub fn write_csv_to<W: Write>(&self, writer: W) -> Result<(), SampleError> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(&self.columns)?;
        for row in &self.rows {
            let record = row
                .attributes
                .iter()
                .map(attribute_field)
                .chain(row.values.iter().map(|v| sample_field(*v)));
            csv.write_record(record)?;
        }
        csv.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}

fn attribute_field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn sample_field(value: f32) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

/// Samples a point layer against a [`RasterStack`].
#[derive(Debug)]
pub struct PointSampler<'a> {
    stack: &'a RasterStack,
}

impl<'a> PointSampler<'a> {
    #[must_use]
    pub fn new(stack: &'a RasterStack) -> Self {
        Self { stack }
    }

    /// One row per point-kind feature, in layer order.
    ///
    /// The layer is reprojected once to the stack CRS when they differ.
    /// Features without a point geometry are skipped without a placeholder.
    ///
    /// # Errors
    /// Returns an error for an empty stack or a failed reprojection.
    pub fn sample(&self, layer: PointLayer) -> Result<SampleTable, SampleError> {
        if self.stack.is_empty() {
            return Err(SampleError::EmptyStack);
        }
        let layer = match self.stack.crs() {
            Some(crs) if crs != layer.crs => {
                info!(from = layer.crs, to = crs, "Reprojecting points to the stack CRS");
                layer.to_crs(crs)?
            }
            _ => layer,
        };

        let mut columns = layer.fields.clone();
        columns.extend(self.stack.columns());

        let mut rows = Vec::with_capacity(layer.features.len());
        let mut skipped = 0_usize;
        for feature in layer.features {
            let Some(point) = feature.point() else {
                skipped += 1;
                continue;
            };
            let mut values = Vec::with_capacity(columns.len() - layer.fields.len());
            for member in self.stack.members() {
                let sample = member.raster.sample_xy(point.x(), point.y());
                if !sample.is_valid {
                    debug!(
                        raster = %member.name,
                        x = point.x(),
                        y = point.y(),
                        "Point outside raster extent"
                    );
                }
                values.extend(sample.values);
            }
            rows.push(SampleRow {
                attributes: feature.attributes,
                values,
            });
        }
        if skipped > 0 {
            info!(skipped, "Skipped features without point geometry");
        }
        info!(rows = rows.len(), rasters = self.stack.len(), "Sampled points");
        Ok(SampleTable { columns, rows })
    }
}
