//! The three stages wired to the filesystem.
//!
//! Stages share nothing in memory: compositing writes per-tile rasters to the
//! composite folder, mosaicking reads that folder back, and extraction reads
//! the mosaic folder.

use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::composite::{CompositeReport, Compositor};
use crate::config::{ConfigError, PipelineConfig};
use crate::extract::{PointSampler, RasterStack, SampleError, SampleTable};
use crate::mosaic::{MosaicBuilder, MosaicReport};
use crate::point_layer::{PointLayer, PointLayerError};
use crate::raster::{RasterError, RasterStore};
use crate::source::local::ScanError;
use crate::source::{LocalRasterCatalog, LocalScanOptions, RasterCatalog};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error(transparent)]
    Sample(#[from] SampleError),

    #[error(transparent)]
    PointLayer(#[from] PointLayerError),
}

/// Results of a full run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub composites: CompositeReport,
    pub mosaics: MosaicReport,
    pub extract: SampleTable,
}

pub struct Pipeline<S: RasterStore> {
    config: PipelineConfig,
    store: S,
}

impl<S: RasterStore> Pipeline<S> {
    /// # Errors
    /// Returns an error if the configuration does not validate.
    pub fn new(config: PipelineConfig, store: S) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { config, store })
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Composite every product stack found under the input root.
    ///
    /// # Errors
    /// Returns an error if the input root is missing or a composite cannot be written.
    pub fn composite(&self) -> Result<CompositeReport, PipelineError> {
        let mut options = LocalScanOptions::tiles();
        if let Some(token) = &self.config.product_token {
            options = options.name_contains(token.as_str());
        }
        let catalog = LocalRasterCatalog::scan(&self.config.input_root, &options)?;
        info!(
            root = %self.config.input_root.display(),
            tiles = catalog.tiles().len(),
            rasters = catalog.len(),
            "Discovered input stacks"
        );
        Ok(Compositor::new(&self.store, &self.config).run(catalog.entries())?)
    }

    /// Mosaic the composites of every configured group.
    ///
    /// # Errors
    /// Returns an error if the composite folder is missing or a mosaic cannot be written.
    pub fn mosaic(&self) -> Result<MosaicReport, PipelineError> {
        let catalog = LocalRasterCatalog::scan(&self.config.composite_dir, &LocalScanOptions::flat())?;
        info!(
            root = %self.config.composite_dir.display(),
            composites = catalog.len(),
            "Discovered composites"
        );
        Ok(MosaicBuilder::new(&self.store, &self.config).run(&catalog)?)
    }

    /// Sample every mosaic at the points of a GeoJSON layer and write the table.
    ///
    /// # Errors
    /// Returns an error if any mosaic or the point layer cannot be read, or
    /// the table cannot be written.
    pub fn extract(&self, points: &Path) -> Result<SampleTable, PipelineError> {
        let catalog = LocalRasterCatalog::scan(&self.config.mosaic_dir, &LocalScanOptions::flat())?;
        let paths: Vec<&Path> = catalog.entries().iter().map(|e| e.path.as_path()).collect();
        info!(root = %self.config.mosaic_dir.display(), rasters = paths.len(), "Loading raster stack");
        let stack = RasterStack::open(&self.store, &paths)?;
        if stack.is_empty() {
            return Err(SampleError::EmptyStack.into());
        }

        let layer = PointLayer::from_geojson_path(points)?;
        let table = PointSampler::new(&stack).sample(layer)?;
        table.write_csv(&self.config.extract_csv)?;
        Ok(table)
    }

    /// Composite, mosaic and extract in sequence.
    ///
    /// # Errors
    /// Returns the first fatal error of any stage.
    pub fn run(&self, points: &Path) -> Result<RunReport, PipelineError> {
        let composites = self.composite()?;
        let mosaics = self.mosaic()?;
        let extract = self.extract(points)?;
        Ok(RunReport {
            composites,
            mosaics,
            extract,
        })
    }
}
